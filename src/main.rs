//! Command-line front-end. Thin by design (§1 non-goals: no GUI, no
//! persisted configuration): it parses arguments, wires a stderr logger and
//! a progress sink up, and calls straight into the library's blocking
//! `Session` API.

use std::fs;
use std::process::ExitCode;

use miette::{IntoDiagnostic, Result, WrapErr};
use pico_args::Arguments;
use psoc6_flash::{self, Ap, AcquireMode, CancelFlag, ProbeInfo, ProgressSink, Session, SessionConfig};

const HELP: &str = "\
psoc6-flash - host-side flash programmer for PSoC6 CMSIS-DAP probes

USAGE:
    psoc6-flash scan
    psoc6-flash info    [--serial <serial>]
    psoc6-flash erase   [--serial <serial>] <start> <end>
    psoc6-flash program [--serial <serial>] <firmware-file> [<start>]
    psoc6-flash verify  [--serial <serial>] <firmware-file> [<start>]

OPTIONS:
    --serial <serial>   select a probe by its reported serial number
    -h, --help          print this message
";

struct StderrSink;

impl ProgressSink for StderrSink {
    fn log(&self, text: &str) {
        eprintln!("{text}");
    }

    fn progress(&self, done: u32, total: u32) {
        eprint!("\r{done}/{total} bytes");
        if done >= total {
            eprintln!();
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let mut args = Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        println!("{HELP}");
        return Ok(());
    }

    let command: Option<String> = args.opt_free_from_str().into_diagnostic()?;
    match command.as_deref() {
        Some("scan") => cmd_scan(),
        Some("info") => cmd_info(args),
        Some("erase") => cmd_erase(args),
        Some("program") => cmd_program(args),
        Some("verify") => cmd_verify(args),
        _ => {
            println!("{HELP}");
            Ok(())
        }
    }
}

fn find_probe(args: &mut Arguments) -> Result<ProbeInfo> {
    let serial: Option<String> = args.opt_value_from_str("--serial").into_diagnostic()?;

    let probes = psoc6_flash::scan().into_diagnostic().wrap_err("failed to enumerate CMSIS-DAP probes")?;
    let selected = match serial {
        Some(serial) => probes.into_iter().find(|p| p.serial_number.as_deref() == Some(serial.as_str())),
        None => probes.into_iter().next(),
    };
    selected.ok_or_else(|| miette::miette!("no matching CMSIS-DAP probe found"))
}

fn free_strings(args: Arguments) -> Vec<String> {
    args.finish().into_iter().map(|s| s.to_string_lossy().into_owned()).collect()
}

fn cmd_scan() -> Result<()> {
    let probes = psoc6_flash::scan().into_diagnostic().wrap_err("failed to enumerate CMSIS-DAP probes")?;
    if probes.is_empty() {
        println!("no CMSIS-DAP probes found");
    }
    for probe in probes {
        println!(
            "{:04x}:{:04x} {} (serial: {})",
            probe.vendor_id,
            probe.product_id,
            probe.product_string.as_deref().unwrap_or("unknown"),
            probe.serial_number.as_deref().unwrap_or("none"),
        );
    }
    Ok(())
}

fn cmd_info(mut args: Arguments) -> Result<()> {
    let probe = find_probe(&mut args)?;
    let mut session = Session::open(&probe, SessionConfig::default(), Box::new(StderrSink))
        .into_diagnostic()
        .wrap_err("failed to open probe")?;
    let cancel = CancelFlag::new();
    session.acquire(AcquireMode::Reset, Ap::Cm4, &cancel).into_diagnostic().wrap_err("failed to acquire target")?;
    let info = session.get_info(&cancel).into_diagnostic().wrap_err("failed to read silicon ID")?;
    println!(
        "family_id={:#06x} silicon_id={:#010x} revision_id={:#04x} protection={}",
        info.family_id, info.silicon_id, info.revision_id, info.protection_state
    );
    session.close().into_diagnostic()?;
    Ok(())
}

fn cmd_erase(mut args: Arguments) -> Result<()> {
    let probe = find_probe(&mut args)?;
    let free = free_strings(args);
    if free.len() != 2 {
        return Err(miette::miette!("usage: psoc6-flash erase [--serial <serial>] <start> <end>"));
    }
    let start = parse_addr(&free[0])?;
    let end = parse_addr(&free[1])?;

    let mut session = Session::open(&probe, SessionConfig::default(), Box::new(StderrSink))
        .into_diagnostic()
        .wrap_err("failed to open probe")?;
    let cancel = CancelFlag::new();
    session.acquire(AcquireMode::Reset, Ap::Cm4, &cancel).into_diagnostic().wrap_err("failed to acquire target")?;
    session.erase(start, end, &cancel).into_diagnostic().wrap_err("erase failed")?;
    session.close().into_diagnostic()?;
    Ok(())
}

fn cmd_program(mut args: Arguments) -> Result<()> {
    let probe = find_probe(&mut args)?;
    let free = free_strings(args);
    if free.is_empty() {
        return Err(miette::miette!("usage: psoc6-flash program [--serial <serial>] <firmware-file> [<start>]"));
    }

    let data = fs::read(&free[0]).into_diagnostic().wrap_err_with(|| format!("failed to read {}", free[0]))?;
    let explicit_start = free.get(1).map(|s| parse_addr(s)).transpose()?;

    let mut session = Session::open(&probe, SessionConfig::default(), Box::new(StderrSink))
        .into_diagnostic()
        .wrap_err("failed to open probe")?;
    let cancel = CancelFlag::new();
    session.acquire(AcquireMode::Reset, Ap::Cm4, &cancel).into_diagnostic().wrap_err("failed to acquire target")?;

    match explicit_start {
        Some(start) => {
            session.program(&data, start, &cancel).into_diagnostic().wrap_err("programming failed")?;
        }
        None => {
            let record = psoc6_flash::load_firmware(&data).into_diagnostic().wrap_err("failed to parse firmware image")?;
            session.program_record(&record, &cancel).into_diagnostic().wrap_err("programming failed")?;
        }
    }

    session.close().into_diagnostic()?;
    Ok(())
}

fn cmd_verify(mut args: Arguments) -> Result<()> {
    let probe = find_probe(&mut args)?;
    let free = free_strings(args);
    if free.is_empty() {
        return Err(miette::miette!("usage: psoc6-flash verify [--serial <serial>] <firmware-file> [<start>]"));
    }

    let data = fs::read(&free[0]).into_diagnostic().wrap_err_with(|| format!("failed to read {}", free[0]))?;
    let explicit_start = free.get(1).map(|s| parse_addr(s)).transpose()?;

    let mut session = Session::open(&probe, SessionConfig::default(), Box::new(StderrSink))
        .into_diagnostic()
        .wrap_err("failed to open probe")?;
    let cancel = CancelFlag::new();
    session.acquire(AcquireMode::Reset, Ap::Cm4, &cancel).into_diagnostic().wrap_err("failed to acquire target")?;

    match explicit_start {
        Some(start) => {
            session.verify(&data, start, &cancel).into_diagnostic().wrap_err("verification failed")?;
        }
        None => {
            let record = psoc6_flash::load_firmware(&data).into_diagnostic().wrap_err("failed to parse firmware image")?;
            for segment in &record.application_flash {
                session
                    .verify(segment.data(), segment.first(), &cancel)
                    .into_diagnostic()
                    .wrap_err("verification failed")?;
            }
        }
    }

    session.close().into_diagnostic()?;
    println!("verify OK");
    Ok(())
}

fn parse_addr(s: &str) -> Result<u32> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse::<u32>()
    };
    parsed.into_diagnostic().wrap_err_with(|| format!("invalid address `{s}`"))
}
