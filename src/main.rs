// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Modbus RTU slave that keeps its register banks in shared memory.
//
// Usage: modbus-rtu-shm --device /dev/ttyUSB0 --id 1 [options]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use modbus_rtu_shm::store::{BankSizes, RegisterStore, MAX_BANK_SIZE};
use modbus_rtu_shm::timeout;
use modbus_rtu_shm::{
    install_signal_handlers, Cancellation, Category, Error, FdConnection, Parity, RequestServer,
    Role, RtuEngine, SerialConfig, SerialMode, Shutdown,
};

const EX_OK: u8 = 0;
const EX_USAGE: u8 = 64;
const EX_UNAVAILABLE: u8 = 69;
const EX_SOFTWARE: u8 = 70;
const EX_OSERR: u8 = 71;

const REGISTER_MAPPING: &str = "\
The modbus registers are mapped to shared memory objects:
    type | name                      | master-access   | shm name
    -----|---------------------------|-----------------|----------------
    DO   | Discrete Output Coils     | read-write      | <name-prefix>DO
    DI   | Discrete Input Coils      | read-only       | <name-prefix>DI
    AO   | Discrete Output Registers | read-write      | <name-prefix>AO
    AI   | Discrete Input Registers  | read-only       | <name-prefix>AI";

/// Modbus RTU client that uses shared memory objects to store its register values
#[derive(Parser, Debug)]
#[command(author, version, about, after_help = REGISTER_MAPPING)]
struct Args {
    /// Serial device
    #[arg(short, long)]
    device: PathBuf,

    /// Modbus RTU slave id (1-247)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=247))]
    id: u8,

    /// Serial parity bit (N(one), E(ven), O(dd))
    #[arg(short, long, default_value = "N")]
    parity: Parity,

    /// Serial data bits (5-8)
    #[arg(long, default_value_t = 8)]
    data_bits: u8,

    /// Serial stop bits (1-2)
    #[arg(long, default_value_t = 1)]
    stop_bits: u8,

    /// Serial baud
    #[arg(short, long, default_value_t = 9600)]
    baud: u32,

    /// Force to use rs485 mode
    #[arg(long, conflicts_with = "rs232")]
    rs485: bool,

    /// Force to use rs232 mode
    #[arg(long)]
    rs232: bool,

    /// Shared memory name prefix
    #[arg(short, long, default_value = "modbus_")]
    name_prefix: String,

    /// Number of digital output registers
    #[arg(long, default_value_t = MAX_BANK_SIZE)]
    do_registers: usize,

    /// Number of digital input registers
    #[arg(long, default_value_t = MAX_BANK_SIZE)]
    di_registers: usize,

    /// Number of analog output registers
    #[arg(long, default_value_t = MAX_BANK_SIZE)]
    ao_registers: usize,

    /// Number of analog input registers
    #[arg(long, default_value_t = MAX_BANK_SIZE)]
    ai_registers: usize,

    /// Output all incoming and outgoing packets to stdout
    #[arg(short, long)]
    monitor: bool,

    /// Remove and recreate shared memory that already exists
    #[arg(long)]
    force: bool,

    /// Octal permissions of the shared memory objects
    #[arg(long, default_value = "660", value_parser = parse_octal)]
    permissions: u32,

    /// Protect register access with the named semaphore
    #[arg(long)]
    semaphore: Option<String>,

    /// Remove and recreate the semaphore if it already exists
    #[arg(long, requires = "semaphore")]
    semaphore_force: bool,

    /// Longest silence between two bytes of a request, in seconds
    #[arg(long)]
    byte_timeout: Option<f64>,

    /// Longest time to transmit a reply, in seconds
    #[arg(long)]
    response_timeout: Option<f64>,
}

fn parse_octal(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s, 8)
        .ok()
        .filter(|p| *p <= 0o777)
        .ok_or_else(|| format!("'{s}' is not an octal permission mask"))
}

impl Args {
    fn serial_config(&self) -> SerialConfig {
        let mode = if self.rs485 {
            SerialMode::Rs485
        } else if self.rs232 {
            SerialMode::Rs232
        } else {
            SerialMode::Unchanged
        };
        SerialConfig {
            device: self.device.clone(),
            baud: self.baud,
            parity: self.parity,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            mode,
        }
    }

    fn bank_sizes(&self) -> BankSizes {
        BankSizes::new(
            self.do_registers,
            self.di_registers,
            self.ao_registers,
            self.ai_registers,
        )
    }
}

fn startup_code(e: &Error) -> u8 {
    match e.category() {
        Category::Configuration => EX_USAGE,
        Category::Resource | Category::Transport => EX_UNAVAILABLE,
        Category::Contention => EX_SOFTWARE,
        Category::Cancelled => EX_OK,
    }
}

fn loop_code(outcome: &modbus_rtu_shm::Result<Shutdown>) -> u8 {
    match outcome {
        Ok(Shutdown::PeerClosed) | Ok(Shutdown::Cancelled) => EX_OK,
        // already logged by the server
        Err(_) => EX_SOFTWARE,
    }
}

fn main() -> ExitCode {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(if e.use_stderr() { EX_USAGE } else { EX_OK });
        }
    };

    let cancel = match Cancellation::new() {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::from(EX_OSERR);
        }
    };
    if let Err(e) = install_signal_handlers(&cancel) {
        log::error!("{e}");
        return ExitCode::from(EX_OSERR);
    }

    let mut server = match setup(&args, cancel) {
        Ok(server) => server,
        Err(e) => {
            log::error!("{e}");
            if e.category() == Category::Configuration {
                eprintln!("Use '{} --help' for more information.", env!("CARGO_PKG_NAME"));
            }
            return ExitCode::from(startup_code(&e));
        }
    };

    log::info!("Connected to bus.");
    let code = loop_code(&server.run());
    log::info!("Terminating...");
    ExitCode::from(code)
}

fn setup(
    args: &Args,
    cancel: Cancellation,
) -> modbus_rtu_shm::Result<RequestServer<FdConnection, RtuEngine>> {
    let serial = args.serial_config();
    serial.validate()?;
    let sizes = args.bank_sizes();
    sizes.validate()?;
    let engine = RtuEngine::new(args.id)?;
    for t in [args.byte_timeout, args.response_timeout].into_iter().flatten() {
        timeout::checked_to_native(t)?;
    }

    let store = RegisterStore::create(sizes, &args.name_prefix, args.force, args.permissions)?;
    let mut connection = FdConnection::open_serial(&serial, cancel.clone())?;
    if let Some(t) = args.byte_timeout {
        connection.set_byte_timeout(t)?;
    }
    if let Some(t) = args.response_timeout {
        connection.set_response_timeout(t)?;
    }

    let mut server = RequestServer::new(Role::Slave, connection, engine, store, cancel);
    if let Some(name) = &args.semaphore {
        server.enable_guard(name, args.semaphore_force)?;
    }
    server.set_monitor(args.monitor);
    Ok(server)
}
