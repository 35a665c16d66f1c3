//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI document of the Visualize.AI REST API.
//!
//! Usage: `openapi [OUTPUT]`, where `OUTPUT` defaults to `openapi.json`.

use api_lib::web::rest::ApiDoc;
use std::path::PathBuf;
use utoipa::OpenApi;

const DEFAULT_OUTPUT: &str = "openapi.json";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    let doc = ApiDoc::openapi();
    let path_count = doc.paths.paths.len();
    std::fs::write(&output, doc.to_pretty_json()?)?;
    println!(
        "Wrote OpenAPI document ({} paths) to {}",
        path_count,
        output.display()
    );
    Ok(())
}
