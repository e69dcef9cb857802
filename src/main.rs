use std::process::ExitCode;

fn main() -> ExitCode {
    match glcam_preview_lib::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("glcam-preview failed: {e}");
            eprintln!("glcam-preview: {e}");
            ExitCode::FAILURE
        }
    }
}
