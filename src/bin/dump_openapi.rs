use std::fs;

fn main() -> anyhow::Result<()> {
    let port = std::env::var("APP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000);

    let doc = enquiry_desk::docs::build_openapi(port)?;
    let s = serde_json::to_string_pretty(&doc)?;

    match std::env::args().nth(1) {
        Some(path) => {
            fs::write(&path, s)?;
            println!("wrote {}", path);
        }
        None => println!("{s}"),
    }
    Ok(())
}
