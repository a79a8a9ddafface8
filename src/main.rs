use clap::Parser;
use ltfs_format::cli::Cli;
use ltfs_format::error::LtfsError;
use ltfs_format::tape::{MemTape, TapeDrive};
use ltfs_format::volume::{CancelToken, FormatOptions, Volume};
use tracing::{debug, error, info};

/// Exit codes: 0 success, 1 usage or validation error, 2 operational
/// error, 3 cancelled by the user, 4 unformatted medium (wipe mode).
fn exit_code(err: &LtfsError) -> i32 {
    match err {
        LtfsError::Cancelled => 3,
        LtfsError::NotPartitioned => 4,
        LtfsError::NullArg(_)
        | LtfsError::InvalidPath(_)
        | LtfsError::NameTooLong { .. }
        | LtfsError::PolicyInvalid(_)
        | LtfsError::PolicyEmptyRule(_)
        | LtfsError::PolicyImmutable => 1,
        _ => 2,
    }
}

#[tokio::main]
async fn main() {
    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    if let Err(e) = ltfs_format::logger::init(args.verbose) {
        eprintln!("cannot initialize logging: {e}");
        std::process::exit(2);
    }

    debug!("mkltfs starting");

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("cancellation requested");
                cancel.cancel();
            }
        });
    }

    let result = tokio::task::spawn_blocking(move || run(args, cancel))
        .await
        .unwrap_or_else(|e| Err(LtfsError::internal(format!("worker panicked: {e}"))));

    match result {
        Ok(()) => {
            info!("operation completed successfully");
        }
        Err(e) => {
            error!("operation failed: {e}");
            std::process::exit(exit_code(&e));
        }
    }
}

fn run(args: Cli, cancel: CancelToken) -> Result<(), LtfsError> {
    if cancel.is_cancelled() {
        return Err(LtfsError::Cancelled);
    }

    let drive = open_device(&args.device)?;

    if args.wipe {
        return Volume::unformat(drive, args.long_wipe);
    }

    let opts = FormatOptions {
        blocksize: args.blocksize,
        volume_serial: args.tape_serial.clone(),
        volume_name: args.volume_name.clone(),
        rules: args.rules.clone(),
        no_override: args.no_override,
        compression: !args.no_compression,
        index_partition_mib: args.index_partition_mib,
        force: args.force,
    };

    let volume = Volume::format(drive, opts)?;
    info!(
        uuid = %volume.label().volume_uuid,
        blocksize = volume.label().blocksize,
        "cartridge formatted"
    );
    volume.unmount().map(|_| ())
}

/// Open a tape device by name. `mem:<MiB>` builds an in-memory
/// cartridge; vendor SCSI backends implement [`TapeDrive`] out of tree
/// and register their own schemes.
fn open_device(devname: &str) -> Result<Box<dyn TapeDrive>, LtfsError> {
    let mut drive: Box<dyn TapeDrive> = match devname.split_once(':') {
        Some(("mem", size)) => {
            let mib: u64 = size
                .parse()
                .map_err(|_| LtfsError::DeviceUnopenable(format!("bad mem: size in {devname}")))?;
            Box::new(MemTape::with_capacity(mib * 1024 * 1024))
        }
        _ => {
            return Err(LtfsError::DeviceUnopenable(format!(
                "no backend for device {devname}"
            )))
        }
    };
    drive.open(devname)?;
    drive.load(false)?;
    Ok(drive)
}
