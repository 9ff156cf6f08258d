use emi_core::error::EmiError;
use serde::Serialize;

pub fn print<T: Serialize>(value: &T) -> Result<(), EmiError> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
