use super::*;

/// What a backend scan produced: the best candidate gap in the segment (by
/// start offset within the whole adder space) plus counters for the stats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendScan {
    pub gap_start: u64,
    pub gap_size: u32,
    pub primes_checked: u64,
    pub gaps_found: u64,
}

/// An accelerator that sieves and scans segments on its own device. Each
/// backend owns an independent context; candidate gaps it reports are
/// re-verified on the CPU before they become solutions. Stop requests are
/// polled between tiles, and a failing backend only takes down its own
/// worker thread.
pub trait SieveBackend: Send {
    fn name(&self) -> String;

    fn sieve_segment(&mut self, adder_base: u64, segment: &mut SieveSegment) -> Result<()>;

    fn find_gaps(
        &mut self,
        segment: &SieveSegment,
        adder_base: u64,
        target_merit: f64,
        best_merit: f64,
    ) -> Result<Option<BackendScan>>;

    fn request_stop(&self);

    fn is_stop_requested(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuBackendKind {
    OpenCl,
    Cuda,
}

impl FromStr for GpuBackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "opencl" => Ok(Self::OpenCl),
            "cuda" => Ok(Self::Cuda),
            other => bail!("invalid backend '{other}', use 'opencl' or 'cuda'"),
        }
    }
}

impl fmt::Display for GpuBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenCl => write!(f, "opencl"),
            Self::Cuda => write!(f, "cuda"),
        }
    }
}

/// Enumerates devices for a backend. The kernels live out-of-tree; a build
/// without them reports no devices rather than failing.
pub fn available_devices(kind: GpuBackendKind) -> Vec<String> {
    debug!("no {kind} runtime linked, reporting zero devices");
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses() {
        assert_eq!("opencl".parse::<GpuBackendKind>().unwrap(), GpuBackendKind::OpenCl);
        assert_eq!("CUDA".parse::<GpuBackendKind>().unwrap(), GpuBackendKind::Cuda);
        assert!("metal".parse::<GpuBackendKind>().is_err());
    }

    #[test]
    fn no_devices_without_a_runtime() {
        assert!(available_devices(GpuBackendKind::OpenCl).is_empty());
        assert!(available_devices(GpuBackendKind::Cuda).is_empty());
    }
}
