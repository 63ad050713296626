//! Kernel-wide error types.
//!
//! Every subsystem exposes a typed `Result`; the per-subsystem error enums
//! convert into [`KernelError`] via `From`, and `KernelError` itself converts
//! to a negative Linux `errno` at the syscall boundary (see
//! [`KernelError::errno`]).

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    OutOfMemory {
        requested: usize,
        available: usize,
    },
    InvalidAddress {
        addr: usize,
    },
    UnmappedMemory {
        addr: usize,
    },
    AlreadyMapped {
        addr: usize,
    },
    ProcessNotFound {
        pid: u64,
    },
    NoSuchChild,
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    SchedulerError(SchedError),
    SyscallError(SyscallError),
    FsError(FsError),
    SignalError(SignalError),
    DriverError(DriverError),
    HardwareError {
        device: &'static str,
        code: u32,
    },
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
    OperationNotSupported {
        operation: &'static str,
    },
    ResourceExhausted {
        resource: &'static str,
    },
    PermissionDenied {
        operation: &'static str,
    },
    NotFound {
        resource: &'static str,
        id: u64,
    },
    AlreadyExists {
        resource: &'static str,
        id: u64,
    },
    Timeout {
        operation: &'static str,
        duration_ms: u64,
    },
    NotImplemented {
        feature: &'static str,
    },
    /// Operation would block; only meaningful on a non-blocking descriptor.
    WouldBlock,
    /// Interrupted by a signal before completing; caller decides whether to
    /// retry per `SA_RESTART`.
    Interrupted,
    BrokenPipe,
    /// Subsystem not initialized (called before init()).
    NotInitialized {
        subsystem: &'static str,
    },
    /// User pointer faulted while SMAP-disabled access was in progress.
    BadUserPointer {
        addr: usize,
    },
    ExecFormat,
}

/// Scheduler-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    TaskNotFound { id: u64 },
    QueueEmpty,
}

/// System call errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall { nr: usize },
    InvalidArgument { arg: usize },
    InvalidPointer { addr: usize },
    BufferTooSmall { required: usize, provided: usize },
    NotImplemented,
}

/// Filesystem-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    NotADirectory,
    NotAFile,
    IsADirectory,
    ReadOnly,
    InvalidPath,
    NoRootFs,
    DirectoryNotEmpty,
    TooManyOpenFiles,
    BadFileDescriptor,
    NotSupported,
    NotATty,
    IoError,
}

/// Signal-subsystem errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    InvalidSignal { signo: u32 },
    CannotCatch { signo: u32 },
    NoSuchTimer { id: u32 },
    TimerTableFull,
}

/// xHCI / device driver errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    Timeout,
    CommandFailed { completion_code: u8 },
    TransferFailed { completion_code: u8 },
    NoFreeSlot,
    DescriptorTooShort,
    UnsupportedSpeed,
    ControllerNotResponding,
}

pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Maps this error to a negative Linux errno value, as returned in `RAX`
    /// on syscall return.
    pub fn errno(&self) -> i32 {
        let e: i32 = match self {
            Self::OutOfMemory { .. } => 12,         // ENOMEM
            Self::InvalidAddress { .. } => 14,      // EFAULT
            Self::UnmappedMemory { .. } => 14,      // EFAULT
            Self::AlreadyMapped { .. } => 22,       // EINVAL (address already mapped)
            Self::ProcessNotFound { .. } => 3,      // ESRCH
            Self::NoSuchChild => 10,                // ECHILD
            Self::InvalidState { .. } => 22,        // EINVAL
            Self::SchedulerError(_) => 22,
            Self::SyscallError(SyscallError::InvalidSyscall { .. }) => 38, // ENOSYS
            Self::SyscallError(_) => 22,
            Self::FsError(fs) => match fs {
                FsError::NotFound => 2,             // ENOENT
                FsError::AlreadyExists => 17,       // EEXIST (not in spec table; still Linux-correct)
                FsError::PermissionDenied => 13,    // EACCES
                FsError::NotADirectory => 20,       // ENOTDIR
                FsError::NotAFile | FsError::IsADirectory => 21, // EISDIR
                FsError::ReadOnly => 30,            // EROFS
                FsError::InvalidPath => 22,
                FsError::NoRootFs => 2,
                FsError::DirectoryNotEmpty => 39,   // ENOTEMPTY
                FsError::TooManyOpenFiles => 24,    // EMFILE
                FsError::BadFileDescriptor => 9,    // EBADF
                FsError::NotSupported => 38,
                FsError::NotATty => 25,             // ENOTTY
                FsError::IoError => 5,              // EIO
            },
            Self::SignalError(_) => 22,
            Self::DriverError(_) => 5,              // EIO
            Self::HardwareError { .. } => 5,
            Self::InvalidArgument { .. } => 22,
            Self::OperationNotSupported { .. } => 38,
            Self::ResourceExhausted { .. } => 12,
            Self::PermissionDenied { .. } => 13,
            Self::NotFound { .. } => 2,
            Self::AlreadyExists { .. } => 17, // EEXIST
            Self::Timeout { .. } => 5,
            Self::NotImplemented { .. } => 38,
            Self::WouldBlock => 11,                 // EAGAIN
            Self::Interrupted => 4,                 // EINTR
            Self::BrokenPipe => 5,
            Self::NotInitialized { .. } => 5,
            Self::BadUserPointer { .. } => 14,       // EFAULT
            Self::ExecFormat => 8,                  // ENOEXEC
        };
        -e
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested, available } => write!(
                f,
                "out of memory: requested {} bytes, {} available",
                requested, available
            ),
            Self::InvalidAddress { addr } => write!(f, "invalid address: 0x{:x}", addr),
            Self::UnmappedMemory { addr } => write!(f, "unmapped memory at 0x{:x}", addr),
            Self::AlreadyMapped { addr } => write!(f, "address already mapped: 0x{:x}", addr),
            Self::ProcessNotFound { pid } => write!(f, "process {} not found", pid),
            Self::NoSuchChild => write!(f, "no such child process"),
            Self::InvalidState { expected, actual } => {
                write!(f, "invalid state: expected {}, got {}", expected, actual)
            }
            Self::SchedulerError(e) => write!(f, "scheduler error: {:?}", e),
            Self::SyscallError(e) => write!(f, "syscall error: {:?}", e),
            Self::FsError(e) => write!(f, "filesystem error: {:?}", e),
            Self::SignalError(e) => write!(f, "signal error: {:?}", e),
            Self::DriverError(e) => write!(f, "driver error: {:?}", e),
            Self::HardwareError { device, code } => {
                write!(f, "hardware error on {}: code 0x{:x}", device, code)
            }
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{}': {}", name, value)
            }
            Self::OperationNotSupported { operation } => {
                write!(f, "operation not supported: {}", operation)
            }
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {}", resource),
            Self::PermissionDenied { operation } => {
                write!(f, "permission denied for operation: {}", operation)
            }
            Self::NotFound { resource, id } => write!(f, "{} with id {} not found", resource, id),
            Self::AlreadyExists { resource, id } => {
                write!(f, "{} with id {} already exists", resource, id)
            }
            Self::Timeout { operation, duration_ms } => {
                write!(f, "timeout during {}: {} ms", operation, duration_ms)
            }
            Self::NotImplemented { feature } => write!(f, "feature not implemented: {}", feature),
            Self::WouldBlock => write!(f, "operation would block"),
            Self::Interrupted => write!(f, "interrupted by signal"),
            Self::BrokenPipe => write!(f, "broken pipe"),
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {}", subsystem)
            }
            Self::BadUserPointer { addr } => write!(f, "bad user pointer: 0x{:x}", addr),
            Self::ExecFormat => write!(f, "exec format error"),
        }
    }
}

impl From<SchedError> for KernelError {
    fn from(err: SchedError) -> Self {
        Self::SchedulerError(err)
    }
}

impl From<SyscallError> for KernelError {
    fn from(err: SyscallError) -> Self {
        Self::SyscallError(err)
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        Self::FsError(err)
    }
}

impl From<SignalError> for KernelError {
    fn from(err: SignalError) -> Self {
        Self::SignalError(err)
    }
}

impl From<DriverError> for KernelError {
    fn from(err: DriverError) -> Self {
        Self::DriverError(err)
    }
}

/// `VfsNode` methods return a bare `&'static str` rather than a typed
/// error; callers that propagate one with `?` into a `KernelError` get it
/// folded into `FsError::IoError` since the underlying filesystem backend
/// is opaque at this layer.
impl From<&'static str> for KernelError {
    fn from(_err: &'static str) -> Self {
        Self::FsError(FsError::IoError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_matches_linux_values() {
        assert_eq!(KernelError::FsError(FsError::NotFound).errno(), -2);
        assert_eq!(KernelError::OutOfMemory { requested: 0, available: 0 }.errno(), -12);
        assert_eq!(KernelError::BadUserPointer { addr: 0 }.errno(), -14);
        assert_eq!(KernelError::Interrupted.errno(), -4);
        assert_eq!(KernelError::ExecFormat.errno(), -8);
        assert_eq!(
            KernelError::SyscallError(SyscallError::InvalidSyscall { nr: 9999 }).errno(),
            -38
        );
    }
}
