// build.rs

use std::env;

fn main() -> anyhow::Result<()> {
    // Necessary because of this issue: https://github.com/rust-lang/cargo/issues/9641
    // see also https://github.com/rust-lang/cargo/issues/9554
    // Host builds compile the portable core only, without ESP-IDF present.
    if env::var("CARGO_FEATURE_ESP32").is_ok() {
        embuild::build::CfgArgs::output_propagated("ESP_IDF")?;
        embuild::build::LinkArgs::output_propagated("ESP_IDF")?;
    }

    let api_port = env::var("API_PORT").unwrap_or_else(|_| "80".into());
    println!("cargo:rustc-env=API_PORT={api_port}");

    Ok(())
}

// EOF
