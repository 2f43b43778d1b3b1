use color_eyre::eyre::{bail, eyre};
use tokio::process::Command;
use tracing::{info, warn};
use weii_core::Measurement;

/// Placeholder replaced with the measured weight in user commands.
const WEIGHT_PLACEHOLDER: &str = "{weight}";

/// Whether `address` looks like `xx:xx:xx:xx:xx:xx` with hex digits.
pub fn is_valid_address(address: &str) -> bool {
    let parts: Vec<&str> = address.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// The weight handed to user commands: adjusted total in kilograms,
/// whatever unit the results are printed in.
pub fn command_weight_kg(measurement: &Measurement, adjust_kg: f64) -> f64 {
    measurement.total_kg() + adjust_kg
}

pub fn render_command(template: &str, weight: f64) -> String {
    template.replace(WEIGHT_PLACEHOLDER, &format!("{weight:.1}"))
}

/// Run a user command through the shell with the weight substituted in.
pub async fn run_command(template: &str, weight: f64) -> color_eyre::Result<()> {
    let command = render_command(template, weight);
    info!(%command, "Running post-measurement command");

    let status = Command::new("sh").arg("-c").arg(&command).status().await?;
    if !status.success() {
        bail!("command '{command}' exited with {status}");
    }
    Ok(())
}

/// Ask bluez to drop the connection to the board so it powers off.
pub async fn disconnect(address: &str) -> color_eyre::Result<()> {
    if !is_valid_address(address) {
        return Err(eyre!("invalid bluetooth address '{address}'"));
    }

    info!(%address, "Disconnecting board");
    let output = Command::new("bluetoothctl")
        .arg("disconnect")
        .arg(address)
        .output()
        .await?;

    if !output.status.success() {
        warn!(
            %address,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "bluetoothctl disconnect failed"
        );
        bail!("failed to disconnect {address}");
    }
    Ok(())
}
