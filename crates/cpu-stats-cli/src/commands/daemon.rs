//! `cpu-stats daemon`: sample every interval until SIGINT/SIGTERM.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use cpu_stats_core::{Access, Collector, DaemonConfig, MetricKind, Verbosity, collectors};
use log::{debug, error, info, warn};

/// Exit code when the daemon cannot start, e.g. another instance is running.
pub const EXIT_STARTUP: i32 = 3;
/// Exit code for an unusable configuration.
pub const EXIT_CONFIG: i32 = 2;

/// Run the daemon; returns the process exit code.
pub fn run(config: &DaemonConfig) -> i32 {
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        return EXIT_CONFIG;
    }

    // Segments are created before detaching so startup errors reach the terminal.
    let mut collectors =
        match collectors::open_all(&MetricKind::ALL, &config.stats, Access::Owned) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: {e}");
                if e.is_already_running() {
                    eprintln!("Is another instance of the daemon running?");
                }
                return EXIT_STARTUP;
            }
        };
    for c in &collectors {
        info!("{}: tracking {} device(s)", c.name(), c.device_count());
    }

    if !config.foreground
        && let Err(e) = detach()
    {
        error!("cannot detach: {e}");
        return EXIT_STARTUP;
    }

    let _pid_file = if is_root() {
        raise_priority();
        match PidFile::acquire(&config.pid_file) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("cannot lock {}: {e}", config.pid_file.display());
                return EXIT_STARTUP;
            }
        }
    } else {
        None
    };

    // Installed after detaching: fork keeps only the calling thread.
    let (stop_tx, stop_rx) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        error!("cannot install signal handler: {e}");
        return EXIT_STARTUP;
    }

    info!(
        "sampling every {} s into namespace '{}'",
        config.interval_secs, config.stats.namespace
    );
    sample_until_stopped(&mut collectors, config.interval_secs, &stop_rx);

    info!("stopping, final report follows");
    log_final_report(&collectors);
    0
}

/// Tick loop. Each tick waits for the next deadline or a stop request.
fn sample_until_stopped(
    collectors: &mut [Box<dyn Collector>],
    interval_secs: u32,
    stop: &mpsc::Receiver<()>,
) {
    let interval = Duration::from_secs(u64::from(interval_secs));
    let mut deadline = Instant::now() + interval;
    loop {
        match stop.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }
        let weight = tick_weight(Instant::now().saturating_duration_since(deadline), interval);
        if weight > 1 {
            warn!("missed {} tick(s), weighting this sample by {weight}", weight - 1);
        }
        for c in collectors.iter_mut() {
            c.update(interval_secs, weight);
        }
        deadline += interval * weight;
    }
}

/// Ticks a sample stands for when it is taken `late_by` after its deadline:
/// the tick itself plus every deadline that passed in the meantime.
pub fn tick_weight(late_by: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    let missed = late_by.as_nanos() / interval.as_nanos();
    u32::try_from(missed).unwrap_or(u32::MAX - 1) + 1
}

fn log_final_report(collectors: &[Box<dyn Collector>]) {
    let mut out = Vec::new();
    for c in collectors {
        if let Err(e) = c.render(&mut out, Verbosity::Full) {
            warn!("{}: cannot render final report: {e}", c.name());
        }
    }
    for line in String::from_utf8_lossy(&out).lines() {
        info!("{line}");
    }
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

fn raise_priority() {
    // SAFETY: plain syscall on the calling process.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, -20) };
    if rc != 0 {
        warn!("cannot raise priority: {}", io::Error::last_os_error());
    }
}

fn detach() -> io::Result<()> {
    // SAFETY: no threads have been started yet, so forking is sound.
    if unsafe { libc::daemon(0, 0) } != 0 {
        return Err(io::Error::last_os_error());
    }
    debug!("detached, pid {}", std::process::id());
    Ok(())
}

/// A PID file holding an exclusive `fcntl` write lock, removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    // The lock lives as long as the descriptor.
    _file: File,
}

impl PidFile {
    /// Create or reuse `path`, lock it and write the current PID.
    ///
    /// Fails with `WouldBlock` if another process holds the lock.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        // SAFETY: flock is a plain C struct; all-zero is a valid value.
        let mut lock: libc::flock = unsafe { std::mem::zeroed() };
        lock.l_type = libc::F_WRLCK as libc::c_short;
        lock.l_whence = libc::SEEK_SET as libc::c_short;
        // SAFETY: the descriptor is open and `lock` is a valid flock.
        let rc = unsafe {
            libc::fcntl(
                file.as_raw_fd(),
                libc::F_SETLK,
                &lock as *const libc::flock,
            )
        };
        if rc != 0 {
            let e = io::Error::last_os_error();
            return Err(match e.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EACCES) => io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!("{} is locked by another process", path.display()),
                ),
                _ => e,
            });
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("cannot remove {}: {e}", self.path.display());
        }
    }
}
