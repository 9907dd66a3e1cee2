use weft::error::Result;

pub fn run() -> Result<()> {
    println!("weft {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
