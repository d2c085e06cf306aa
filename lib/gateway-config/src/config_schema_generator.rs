use hive_gateway_config::HiveGatewayConfig;
use schemars::generate::SchemaSettings;

/// Prints the JSON schema of the gateway configuration, or writes it to the path given as
/// first argument.
pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    let schema = SchemaSettings::draft2020_12()
        .with(|settings| settings.inline_subschemas = true)
        .into_generator()
        .into_root_schema_for::<HiveGatewayConfig>();
    let rendered = serde_json::to_string_pretty(&schema)?;

    let Some(output_path) = std::env::args().nth(1) else {
        println!("{rendered}");
        return Ok(());
    };
    std::fs::write(&output_path, rendered)?;
    eprintln!("gateway config schema written to {output_path}");

    Ok(())
}
