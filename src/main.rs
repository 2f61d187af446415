//! nfsstress: NFSv3 load generator and latency measurement harness.
//!
//! `nfsstress [options] <command> <args>` where command is one of
//! `getattr`, `read`, `null`, or `shell`. Exit codes follow BSD sysexits.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use tracing::{debug, error, warn, Level};

use nfs_stress::mount::{Mount, MountError};
use nfs_stress::protocol::xdr::mount::mountstat3;
use nfs_stress::stats::SampleRing;
use nfs_stress::sysexits::*;
use nfs_stress::workload::getattr::GetattrWorkload;
use nfs_stress::workload::null::NullWorkload;
use nfs_stress::workload::read::{ReadWorkload, READ_LENGTH_DEFAULT};
use nfs_stress::workload::Workload;
use nfs_stress::{clock, report, shell};

/// Sampler cadence: one snapshot every 100 ms.
const SAMPLE_PERIOD_USEC: u64 = 100_000;

#[derive(Parser)]
#[command(
    name = "nfsstress",
    version,
    about = "NFSv3 load generator and latency measurement harness",
    long_about = None
)]
struct Cli {
    /// Duration of the test (in seconds)
    #[arg(short = 'd', value_name = "seconds", global = true, default_value_t = 60)]
    duration: u64,

    /// Max number of concurrent request jobs
    #[arg(short = 'j', value_name = "max_jobs", global = true, default_value_t = 1)]
    jobs_max: u32,

    /// Print a status line every mark seconds (0 disables)
    #[arg(short = 'm', value_name = "seconds", global = true, default_value_t = 0)]
    mark: u32,

    /// Directory in which to store results
    #[arg(short = 'o', value_name = "outdir", global = true)]
    outdir: Option<PathBuf>,

    /// Remote NFSd port
    #[arg(short = 'p', value_name = "port", global = true, default_value_t = 2049)]
    port: u16,

    /// Terminal type for gnuplot
    #[arg(short = 'T', value_name = "term", global = true, default_value = "png")]
    term: String,

    /// Max number of reply receiver threads
    #[arg(short = 't', value_name = "max_threads", global = true, default_value_t = 1)]
    tds_max: u32,

    /// Increase verbosity (repeatable)
    #[arg(short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive NFS3 GETATTR against the export root
    Getattr {
        /// [user@]rhost:path
        rhostpath: String,
    },

    /// Drive NFS3 READ against the export root
    Read {
        /// [user@]rhost:path
        rhostpath: String,

        /// Read length in bytes
        length: Option<u64>,
    },

    /// Drive NFS3 NULL (no arguments, no attributes)
    Null {
        /// [user@]rhost:path
        rhostpath: String,
    },

    /// Interactive shell
    Shell,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EX_OK,
                _ => EX_USAGE,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_tracing(cli.verbose);
    report_env_override();
    clock::init();

    if let Command::Shell = cli.command {
        std::process::exit(shell::run());
    }

    if let Some(outdir) = &cli.outdir {
        if let Err(e) = std::fs::create_dir_all(outdir) {
            error!("mkdir {} failed: {e}", outdir.display());
            std::process::exit(EX_OSERR);
        }
        if let Err(e) = std::env::set_current_dir(outdir) {
            error!("chdir {} failed: {e}", outdir.display());
            std::process::exit(EX_OSERR);
        }
    }

    raise_priority();

    let (rhostpath, workload): (&String, Arc<dyn Workload>) = match &cli.command {
        Command::Getattr { rhostpath } => {
            (rhostpath, Arc::new(GetattrWorkload::new(cli.duration)))
        }
        Command::Null { rhostpath } => (rhostpath, Arc::new(NullWorkload::new(cli.duration))),
        Command::Read { rhostpath, length } => {
            let length = length.unwrap_or(READ_LENGTH_DEFAULT);
            match ReadWorkload::new(cli.duration, length) {
                Ok(workload) => (rhostpath, Arc::new(workload)),
                Err(e) => {
                    error!("{e}");
                    std::process::exit(EX_USAGE);
                }
            }
        }
        Command::Shell => unreachable!(),
    };

    let mnt = match Mount::mount(rhostpath, cli.port, cli.tds_max, cli.jobs_max) {
        Ok(mnt) => mnt,
        Err(e) => {
            error!("mount {rhostpath} failed: {e}");
            std::process::exit(exit_code_for(&e));
        }
    };

    let samples_per_sec = 1_000_000 / SAMPLE_PERIOD_USEC;
    let mut ring = cli
        .outdir
        .as_ref()
        .map(|_| SampleRing::new(((cli.duration + 1) * samples_per_sec) as usize));

    for _ in 0..cli.jobs_max {
        if let Err(e) = Mount::ignite(&mnt, &workload) {
            error!("job ignition failed: {e:#}");
            std::process::exit(EX_DATAERR);
        }
    }

    report::stats_loop(
        &mnt,
        cli.mark,
        SAMPLE_PERIOD_USEC,
        cli.duration,
        ring.as_mut(),
        cli.outdir.as_deref(),
        &cli.term,
    );

    mnt.unmount();
}

fn exit_code_for(e: &MountError) -> i32 {
    match e {
        MountError::BadTarget(_) | MountError::Resolve { .. } => EX_NOHOST,
        MountError::Connect { .. } | MountError::Io(_) => EX_OSERR,
        MountError::Mount { status, .. } => match status {
            mountstat3::MNT3ERR_PERM | mountstat3::MNT3ERR_ACCES => EX_NOPERM,
            mountstat3::MNT3ERR_IO => EX_IOERR,
            mountstat3::MNT3ERR_NOENT
            | mountstat3::MNT3ERR_NOTDIR
            | mountstat3::MNT3ERR_INVAL
            | mountstat3::MNT3ERR_NAMETOOLONG => EX_DATAERR,
            _ => EX_PROTOCOL,
        },
        MountError::Handshake(_) | MountError::Rpc(_) => EX_PROTOCOL,
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();
}

/// `getenv(UPPERCASE(progname))` is reserved for future use: the value is
/// reported and ignored.
fn report_env_override() {
    let progname = std::env::args()
        .next()
        .as_deref()
        .and_then(|arg0| arg0.rsplit('/').next().map(str::to_string))
        .unwrap_or_else(|| "nfsstress".to_string());

    let var = progname.to_uppercase();
    if let Ok(val) = std::env::var(&var) {
        warn!("getenv {var}=\"{val}\" ignored");
    }
}

fn raise_priority() {
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS as _, 0, -15) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EACCES) {
            debug!("unable to raise priority: {err}");
        } else {
            warn!("unable to raise priority: {err}");
        }
    }
}
