use super::export_failed;
use crate::error::{RefeedError, Result};
use std::io::Write;
use std::path::Path;

/// Export any serializable data structure to pretty JSON
pub fn export_json<T, P>(data: &T, output_path: P) -> Result<()>
where
    T: serde::Serialize,
    P: AsRef<Path>,
{
    let path = output_path.as_ref();
    let json_data = serde_json::to_string_pretty(data).map_err(|e| RefeedError::Internal(e.to_string()))?;

    let mut file = std::fs::File::create(path).map_err(|e| export_failed(path, e))?;
    file.write_all(json_data.as_bytes())?;
    file.write_all(b"\n")?;

    Ok(())
}
