use cliexec_core::{ExecutionEngine, ProcessManagerFactory};

/// Process manager for the platform this crate was compiled for
#[cfg(unix)]
pub type PlatformProcessManager = cliexec_unix::UnixProcessManager;

#[cfg(windows)]
pub type PlatformProcessManager = cliexec_windows::WindowsProcessManager;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

impl ProcessManagerFactory for PlatformProcessManagerFactory {
    type Manager = PlatformProcessManager;

    fn create_process_manager() -> Self::Manager {
        #[cfg(unix)]
        return cliexec_unix::UnixProcessManagerFactory::create_process_manager();

        #[cfg(windows)]
        return cliexec_windows::WindowsProcessManagerFactory::create_process_manager();
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return cliexec_unix::UnixProcessManagerFactory::platform_name();

        #[cfg(windows)]
        return cliexec_windows::WindowsProcessManagerFactory::platform_name();
    }
}

/// Create an engine backed by the platform process manager
pub fn engine() -> ExecutionEngine<PlatformProcessManager> {
    tracing::debug!(
        platform = PlatformProcessManagerFactory::platform_name(),
        "Creating execution engine"
    );
    ExecutionEngine::new(PlatformProcessManagerFactory::create_process_manager())
}
