use flotilla_core::Config;

pub fn show() -> anyhow::Result<()> {
    let config = Config::from_env();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
