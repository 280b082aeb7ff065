//! ttlens: low-level debugger for Tenstorrent accelerators

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use ttlens::comm::{CachedCommunicator, CommError, Communicator, Server};
use ttlens::debug::{GprIndex, RiscId, RiscLoc};
use ttlens::{Config, Context};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        print_usage();
        return Ok(());
    };
    let rest = &args[1..];

    match command.as_str() {
        "info" => info(),
        "status" => status(rest),
        "load" => load(rest),
        "halt" | "step" | "cont" => run_control(command, rest),
        "serve" => serve(rest),
        "config" => {
            if let Some(path) = Config::user_config_path() {
                println!("# User config: {}", path.display());
            }
            print!("{}", Config::sample_config());
            Ok(())
        }
        "-h" | "--help" | "help" => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            bail!("unknown command '{}'", other)
        }
    }
}

fn print_usage() {
    println!("Usage: ttlens <command> [args]");
    println!();
    println!("Commands:");
    println!("  info                               Show enumerated devices");
    println!("  status <core> [--device N]         Show run state of every risc on a tile");
    println!("  load <core> <risc> <elf> [--run] [--device N]");
    println!("                                     Load an ELF (and start it with --run)");
    println!("  halt|step|cont <core> <risc> [--device N]");
    println!("                                     Halt, single-step or resume one risc");
    println!("  serve <addr> [--replay FILE]       Serve the configured backend over TCP");
    println!("  config                             Print a sample configuration file");
    println!();
    println!("Cores are coordinate literals: 1-1 (noc0), 0,0 (logical tensix), ch3 (dram).");
    println!("Backend selection follows ttlens.toml and TTLENS_* environment variables.");
}

/// Value of `--name <value>` in `args`.
fn option<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Positional arguments, skipping options and their values.
fn positional(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--device" | "--replay" => {
                iter.next();
            }
            a if a.starts_with("--") => {}
            a => out.push(a),
        }
    }
    out
}

fn device_id(args: &[String]) -> anyhow::Result<u8> {
    match option(args, "--device") {
        Some(id) => id.parse().with_context(|| format!("invalid device id '{}'", id)),
        None => Ok(0),
    }
}

fn open_context() -> anyhow::Result<Context> {
    Context::from_config(Config::get()).context("failed to open a device backend")
}

fn info() -> anyhow::Result<()> {
    let ctx = open_context()?;
    for device in ctx.devices()?.values() {
        device.print_summary();
        match device.arc_ping(ctx.comm()) {
            Ok(alive) => println!("  ARC:    {}", if alive { "alive" } else { "no reply" }),
            Err(CommError::NotSupported { .. }) => {}
            Err(e) => println!("  ARC:    {}", e),
        }
        println!();
    }
    Ok(())
}

fn status(args: &[String]) -> anyhow::Result<()> {
    let pos = positional(args);
    let [core] = pos.as_slice() else {
        bail!("usage: ttlens status <core> [--device N]");
    };
    let ctx = open_context()?;
    let coord = ctx.coord(device_id(args)?, core)?;

    for risc in RiscId::ALL {
        let dbg = ctx.debug(RiscLoc::new(coord, 0, risc))?;
        if dbg.is_in_reset()? {
            println!("{:<7} in reset", risc);
            continue;
        }
        let status = dbg.read_status()?;
        if status.halted {
            let pc = dbg.read_gpr(GprIndex::PC)?;
            println!("{:<7} {} pc=0x{:08X}", risc, status, pc);
        } else {
            println!("{:<7} {}", risc, status);
        }
    }
    Ok(())
}

fn load(args: &[String]) -> anyhow::Result<()> {
    let pos = positional(args);
    let [core, risc, elf] = pos.as_slice() else {
        bail!("usage: ttlens load <core> <risc> <elf> [--run] [--device N]");
    };
    let ctx = open_context()?;
    let coord = ctx.coord(device_id(args)?, core)?;
    let risc: RiscId = risc.parse()?;
    let loader = ctx.loader(RiscLoc::new(coord, 0, risc))?;

    let report = if args.iter().any(|a| a == "--run") {
        loader.run_elf(elf)?
    } else {
        loader.load_elf(elf)?
    };

    for section in &report.sections {
        println!(
            "  {:<10} 0x{:08X} {:>8} bytes{}",
            section.name,
            section.address,
            section.size,
            if section.via_debug { " (debug port)" } else { "" }
        );
    }
    println!("Start address: 0x{:08X}", report.start_address());
    if !report.is_verified() {
        for failure in &report.failures {
            println!(
                "  verification failed: {} at offset {}",
                failure.section, failure.first_mismatch
            );
        }
        bail!("{} section(s) did not verify", report.failures.len());
    }
    Ok(())
}

fn run_control(command: &str, args: &[String]) -> anyhow::Result<()> {
    let pos = positional(args);
    let [core, risc] = pos.as_slice() else {
        bail!("usage: ttlens {} <core> <risc> [--device N]", command);
    };
    let ctx = open_context()?;
    let coord = ctx.coord(device_id(args)?, core)?;
    let dbg = ctx.debug(RiscLoc::new(coord, 0, risc.parse()?))?;

    match command {
        "halt" => println!("{:?}", dbg.halt()?),
        "step" => {
            dbg.step()?;
            println!("pc=0x{:08X}", dbg.read_gpr(GprIndex::PC)?);
        }
        _ => println!("{:?}", dbg.resume()?),
    }
    Ok(())
}

fn serve(args: &[String]) -> anyhow::Result<()> {
    let pos = positional(args);
    let [address] = pos.as_slice() else {
        bail!("usage: ttlens serve <addr> [--replay FILE]");
    };

    let comm: Arc<dyn Communicator> = match option(args, "--replay") {
        Some(path) => Arc::new(CachedCommunicator::replay(path)?),
        None => open_context()?.comm_arc(),
    };
    let server = Server::bind(address, comm)?;
    println!("Listening on {}", server.local_addr()?);
    server.run()?;
    Ok(())
}
