use anyhow::Context;

pub fn handle() -> anyhow::Result<()> {
    let schema = fleetform_provider::schema::core_schema();
    let json = schema
        .to_json_pretty()
        .context("スキーマのシリアライズに失敗しました")?;
    println!("{}", json);
    Ok(())
}
