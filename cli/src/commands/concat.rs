use std::sync::Arc;

use filestore::{DriverRegistry, FileConcatenater};
use tracing::info;

use super::CommandError;

pub fn run(
    registry: &Arc<DriverRegistry>,
    output: &str,
    header: Vec<String>,
    remove_chunks: bool,
    chunks: &[String],
) -> Result<(), CommandError> {
    let mut concatenater = FileConcatenater::new(registry.clone());
    concatenater.set_file_name(output);
    concatenater.set_header_line(header);
    concatenater.set_remove_chunks(remove_chunks);
    concatenater.concatenate(chunks)?;
    info!(output, chunks = chunks.len(), "chunks merged");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use filestore::RegistryConfig;

    #[test]
    fn test_merge_keeping_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let chunks: Vec<String> = ["x\n", "y\n"]
            .iter()
            .enumerate()
            .map(|(i, content)| {
                let path = dir.path().join(format!("part{i}"));
                std::fs::write(&path, content).unwrap();
                path.display().to_string()
            })
            .collect();
        let output = dir.path().join("merged").display().to_string();
        let registry = Arc::new(DriverRegistry::with_config(RegistryConfig::empty()));

        run(&registry, &output, vec!["col".to_string()], false, &chunks).unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "col\nx\ny\n");
        assert!(chunks.iter().all(|chunk| std::path::Path::new(chunk).exists()));
    }
}
