//! Device list management commands.

use tether_core::{DeviceRegistry, MemoryRegistry};

/// Print the registered devices, one per line.
pub fn list(registry: &MemoryRegistry, json: bool) -> anyhow::Result<()> {
    let devices = registry.devices();
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("No devices available");
        return Ok(());
    }

    let name_width = devices.iter().map(|d| d.name.len()).max().unwrap_or(0);
    let url_width = devices.iter().map(|d| d.url.len()).max().unwrap_or(0);
    for device in &devices {
        println!(
            "{:name_width$}  {:url_width$}  {}",
            device.name, device.url, device.uid
        );
    }
    Ok(())
}

pub fn register(registry: &MemoryRegistry, url: &str, name: Option<&str>) -> anyhow::Result<()> {
    let target = registry.register(url, name)?;
    println!("Registered {} @ {}", target.name, target.url);
    Ok(())
}

pub fn unregister(registry: &MemoryRegistry, name: &str) -> anyhow::Result<()> {
    let target = registry.unregister(name)?;
    println!("Unregistered {} @ {}", target.name, target.url);
    Ok(())
}
