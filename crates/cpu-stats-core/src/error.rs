//! Segment store errors.

use std::io;

/// Failure to create, open or map a shared-memory segment.
#[derive(Debug)]
pub enum SegmentError {
    /// Exclusive create found the name taken: another writer owns it.
    AlreadyRunning { name: String },
    /// Read-only open found no such segment: the writer is not running.
    ProducerAbsent { name: String },
    /// The named object's size differs from this build's record size.
    LayoutMismatch {
        name: String,
        expected: usize,
        found: u64,
    },
    /// A writer could not take the first sensor reading its segment is
    /// seeded with.
    Sensor {
        name: String,
        what: &'static str,
        source: io::Error,
    },
    /// Any other operating system failure.
    Os {
        name: String,
        op: &'static str,
        source: io::Error,
    },
}

impl SegmentError {
    pub(crate) fn os(name: &str, op: &'static str, source: io::Error) -> Self {
        Self::Os {
            name: name.to_string(),
            op,
            source,
        }
    }

    /// Segment name the failure refers to.
    pub fn name(&self) -> &str {
        match self {
            Self::AlreadyRunning { name }
            | Self::ProducerAbsent { name }
            | Self::LayoutMismatch { name, .. }
            | Self::Sensor { name, .. }
            | Self::Os { name, .. } => name,
        }
    }

    pub fn is_already_running(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. })
    }

    pub fn is_producer_absent(&self) -> bool {
        matches!(self, Self::ProducerAbsent { .. })
    }
}

impl std::fmt::Display for SegmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRunning { name } => {
                write!(f, "could not create shm {name}: segment already exists")
            }
            Self::ProducerAbsent { name } => {
                write!(f, "could not open shm {name}: no such segment")
            }
            Self::LayoutMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "shm {name} has {found} bytes, this build expects {expected}"
            ),
            Self::Sensor { name, what, source } => {
                write!(f, "could not seed shm {name}: cannot read {what}: {source}")
            }
            Self::Os { name, op, source } => write!(f, "could not {op} shm {name}: {source}"),
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sensor { source, .. } | Self::Os { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_segment() {
        let e = SegmentError::AlreadyRunning {
            name: "/cpu_stats_f_cpu_000".to_string(),
        };
        assert!(e.to_string().contains("/cpu_stats_f_cpu_000"));
        assert!(e.is_already_running());
        assert!(!e.is_producer_absent());
    }

    #[test]
    fn os_error_exposes_source() {
        use std::error::Error;
        let e = SegmentError::os("/x", "map", io::Error::from_raw_os_error(libc::ENOMEM));
        assert!(e.source().is_some());
        assert_eq!(e.name(), "/x");
        assert!(e.to_string().starts_with("could not map shm /x"));
    }

    #[test]
    fn sensor_error_names_the_reading() {
        use std::error::Error;
        let e = SegmentError::Sensor {
            name: "/cpu_stats_p_pkg_000".to_string(),
            what: "energy counter",
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(
            e.to_string(),
            "could not seed shm /cpu_stats_p_pkg_000: cannot read energy counter: gone"
        );
        assert!(e.source().is_some());
        assert!(!e.is_already_running());
    }

    #[test]
    fn layout_mismatch_reports_sizes() {
        let e = SegmentError::LayoutMismatch {
            name: "/y".to_string(),
            expected: 200,
            found: 64,
        };
        let s = e.to_string();
        assert!(s.contains("200"));
        assert!(s.contains("64"));
    }
}
