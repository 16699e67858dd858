//! Windows-specific process management implementation

#[cfg(windows)]
mod windows_process_manager;

#[cfg(windows)]
pub use windows_process_manager::{WindowsProcessHandle, WindowsProcessManager};

/// Windows-specific process manager factory
#[cfg(windows)]
pub struct WindowsProcessManagerFactory;

#[cfg(windows)]
impl cliexec_core::ProcessManagerFactory for WindowsProcessManagerFactory {
    type Manager = WindowsProcessManager;

    fn create_process_manager() -> WindowsProcessManager {
        WindowsProcessManager::new()
    }

    fn platform_name() -> &'static str {
        "Windows"
    }
}
