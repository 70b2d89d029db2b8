use anyhow::Result;
use async_trait::async_trait;
use bollard::container::UploadToContainerOptions;
use bollard::Docker;

/// Filesystem write into a running lab container
#[async_trait]
pub trait ContainerFiles: Send + Sync {
    async fn write_file(&self, container_id: &str, path: &str, contents: &[u8]) -> Result<()>;
}

/// Writes files through the Docker API of the lab host
pub struct DockerFileWriter {
    docker: Docker,
}

impl DockerFileWriter {
    pub fn new(server: &str, port: u16, timeout_secs: u64) -> Result<Self> {
        let addr = format!("http://{}:{}", server, port);
        let docker = Docker::connect_with_http(&addr, timeout_secs, bollard::API_DEFAULT_VERSION)
            .map_err(|e| anyhow::anyhow!("Docker API at {} not available: {}", addr, e))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerFiles for DockerFileWriter {
    async fn write_file(&self, container_id: &str, path: &str, contents: &[u8]) -> Result<()> {
        let (dir, filename) = split_target(path)?;
        let tar_bytes = build_tar(&[(filename, contents, 0o644)])
            .map_err(|e| anyhow::anyhow!("Failed to build {} tar: {}", filename, e))?;

        let options = UploadToContainerOptions {
            path: dir.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(container_id, Some(options), tar_bytes.into())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to upload {} to {}: {}", path, container_id, e))?;

        tracing::debug!("Wrote {} ({} bytes) into container {}", path, contents.len(), container_id);
        Ok(())
    }
}

/// Split an absolute file path into the upload directory and the archive entry name
fn split_target(path: &str) -> Result<(&str, &str)> {
    match path.rsplit_once('/') {
        Some((_, "")) | None => Err(anyhow::anyhow!("not an absolute file path: {:?}", path)),
        Some(("", name)) => Ok(("/", name)),
        Some((dir, name)) => Ok((dir, name)),
    }
}

/// Build an in-memory tar archive from (filename, content, mode) entries
fn build_tar(files: &[(&str, &[u8], u32)]) -> Result<Vec<u8>, String> {
    let mut archive = tar::Builder::new(Vec::new());
    for &(filename, content, mode) in files {
        let mut header = tar::Header::new_gnu();
        header.set_path(filename).map_err(|e| format!("tar path error: {}", e))?;
        header.set_size(content.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        archive.append(&header, content).map_err(|e| format!("tar append error: {}", e))?;
    }
    archive.finish().map_err(|e| format!("tar finish error: {}", e))?;
    archive.into_inner().map_err(|e| format!("tar inner error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_split_target() {
        assert_eq!(split_target("/mnt/flash/startup-config").unwrap(), ("/mnt/flash", "startup-config"));
        assert_eq!(split_target("/startup-config").unwrap(), ("/", "startup-config"));
        assert!(split_target("/mnt/flash/").is_err());
        assert!(split_target("startup-config").is_err());
    }

    #[test]
    fn test_build_tar_holds_file() {
        let config = b"hostname leaf1\nend\n";
        let bytes = build_tar(&[("startup-config", config.as_slice(), 0o644)]).unwrap();

        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str(), Some("startup-config"));
        assert_eq!(entry.header().mode().unwrap(), 0o644);

        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        assert_eq!(body, "hostname leaf1\nend\n");
        assert!(entries.next().is_none());
    }
}
