#[cfg(not(target_arch = "wasm32"))]
pub fn show_error_popup(message: &str) {
    use native_dialog::{DialogBuilder, MessageLevel};

    if let Err(e) = DialogBuilder::message()
        .set_level(MessageLevel::Error)
        .set_title("Error")
        .set_text(message)
        .alert()
        .show()
    {
        log::warn!("Could not show error dialog: {e}");
    }
}

#[cfg(target_arch = "wasm32")]
pub fn show_error_popup(_message: &str) {}

/// Logs the error, shows it to the user and aborts the current thread.
pub fn handle_fatal_error<E: std::fmt::Display>(error: E, context: &str) -> ! {
    let message = format!("{}: {}", context, error);
    log::error!("{message}");
    show_error_popup(&message);
    panic!("{}", message);
}
