//! Icon resolution.
//! Turns an [`IconRef`] into a local file the native layer can load, copying
//! remote and embedded resources into temp files that live as long as the
//! resolver.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, info};
use reqwest::Url;
use tempfile::TempPath;

use crate::error::{Error, Result};

/// Extension used when a locator carries none.
const DEFAULT_EXTENSION: &str = "img";

/// Reference to an icon image.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum IconRef {
    /// A file already on the local filesystem.
    Path(PathBuf),
    /// A `file`, `http` or `https` URL.
    Url(String),
    /// Bytes compiled into the binary, e.g. via `include_bytes!`.
    Embedded {
        name: &'static str,
        bytes: &'static [u8],
    },
}

impl IconRef {
    pub fn url(url: impl Into<String>) -> Self {
        IconRef::Url(url.into())
    }

    pub fn embedded(name: &'static str, bytes: &'static [u8]) -> Self {
        IconRef::Embedded { name, bytes }
    }

    /// Parse a user supplied string: anything with a URL scheme is a locator,
    /// everything else a path.
    pub fn parse(value: &str) -> Self {
        match Url::parse(value) {
            // Single letter schemes are Windows drive prefixes.
            Ok(url) if url.scheme().len() > 1 => IconRef::Url(value.to_string()),
            _ => IconRef::Path(PathBuf::from(value)),
        }
    }

    /// Key under which a resolved locator is cached.
    fn cache_key(&self) -> Option<String> {
        match self {
            IconRef::Path(_) => None,
            IconRef::Url(url) => Some(url.clone()),
            IconRef::Embedded { name, .. } => Some(format!("embedded:{name}")),
        }
    }
}

impl fmt::Debug for IconRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IconRef::Path(path) => f.debug_tuple("Path").field(path).finish(),
            IconRef::Url(url) => f.debug_tuple("Url").field(url).finish(),
            IconRef::Embedded { name, bytes } => f
                .debug_struct("Embedded")
                .field("name", name)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

impl From<PathBuf> for IconRef {
    fn from(path: PathBuf) -> Self {
        IconRef::Path(path)
    }
}

impl From<&Path> for IconRef {
    fn from(path: &Path) -> Self {
        IconRef::Path(path.to_path_buf())
    }
}

impl From<&str> for IconRef {
    fn from(path: &str) -> Self {
        IconRef::Path(PathBuf::from(path))
    }
}

#[derive(Default)]
struct ResolverState {
    resolved: HashMap<String, PathBuf>,
    temp_files: Vec<TempPath>,
}

/// Maps icon references to local paths, caching every transfer.
pub struct ResourceResolver {
    prefix: String,
    state: Mutex<ResolverState>,
}

impl ResourceResolver {
    /// `prefix` names the temp files created for transferred resources.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            state: Mutex::new(ResolverState::default()),
        }
    }

    /// Resolve `icon` to a local file path.
    ///
    /// Local paths and `file` URLs are returned as they are. Other locators are
    /// copied into a temp file on first use and the same path is returned on
    /// every later call. The lock is held across the transfer so concurrent
    /// callers for one locator produce a single file.
    pub fn resolve(&self, icon: &IconRef) -> Result<PathBuf> {
        let url = match icon {
            IconRef::Path(path) => return Ok(path.clone()),
            IconRef::Url(raw) => {
                let url =
                    Url::parse(raw).map_err(|_| Error::UnsupportedLocator(raw.to_string()))?;
                if url.scheme() == "file" {
                    return url
                        .to_file_path()
                        .map_err(|_| Error::UnsupportedLocator(raw.to_string()));
                }
                Some(url)
            }
            IconRef::Embedded { .. } => None,
        };

        let Some(key) = icon.cache_key() else {
            return Err(Error::UnsupportedLocator(format!("{icon:?}")));
        };

        let mut state = self.state.lock().unwrap();
        if let Some(path) = state.resolved.get(&key) {
            debug!("Resolved {key} from cache: {}", path.display());
            return Ok(path.clone());
        }

        let (bytes, extension) = match (icon, url) {
            (IconRef::Embedded { name, bytes }, _) => (bytes.to_vec(), extension_of(name)),
            (_, Some(url)) => (fetch(&url, &key)?, extension_of(url.path())),
            _ => return Err(Error::UnsupportedLocator(key)),
        };

        let temp = self.write_temp(&key, &bytes, &extension)?;
        let path = temp.to_path_buf();
        info!("Transferred {key} to {}", path.display());

        state.temp_files.push(temp);
        state.resolved.insert(key, path.clone());
        Ok(path)
    }

    /// Number of temp files currently owned by this resolver.
    pub fn temp_file_count(&self) -> usize {
        self.state.lock().unwrap().temp_files.len()
    }

    /// Delete every temp file and forget the cached mappings. Deletion is best
    /// effort; failures are logged and ignored.
    pub fn cleanup(&self) {
        let mut state = self.state.lock().unwrap();
        state.resolved.clear();
        for temp in state.temp_files.drain(..) {
            let path = temp.to_path_buf();
            if let Err(e) = temp.close() {
                debug!("Failed to remove temp file {}: {}", path.display(), e);
            }
        }
    }

    fn write_temp(&self, key: &str, bytes: &[u8], extension: &str) -> Result<TempPath> {
        let transfer_error = |source| Error::ResourceTransfer {
            locator: key.to_string(),
            source,
        };

        let mut file = tempfile::Builder::new()
            .prefix(&self.prefix)
            .suffix(&format!(".{extension}"))
            .tempfile()
            .map_err(transfer_error)?;
        file.write_all(bytes).map_err(transfer_error)?;
        file.flush().map_err(transfer_error)?;
        Ok(file.into_temp_path())
    }
}

impl Drop for ResourceResolver {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Download the body of a remote locator.
fn fetch(url: &Url, key: &str) -> Result<Vec<u8>> {
    debug!("Downloading {url}");
    let transfer_error = |e: reqwest::Error| Error::ResourceTransfer {
        locator: key.to_string(),
        source: std::io::Error::other(e),
    };

    match url.scheme() {
        "http" | "https" => {
            let response = reqwest::blocking::get(url.clone())
                .and_then(|r| r.error_for_status())
                .map_err(transfer_error)?;
            let bytes = response.bytes().map_err(transfer_error)?;
            Ok(bytes.to_vec())
        }
        _ => Err(Error::UnsupportedLocator(key.to_string())),
    }
}

/// Extension of the last path segment, or `img` if there is none.
fn extension_of(path: &str) -> String {
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_string(),
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PIXEL: &[u8] = b"\x89PNG fake image bytes";

    #[test]
    fn extension_from_last_segment() {
        assert_eq!(extension_of("/icons/idle-48.png"), "png");
        assert_eq!(extension_of("/icons.v2/idle"), "img");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
        assert_eq!(extension_of("trailing."), "img");
        assert_eq!(extension_of(""), "img");
    }

    #[test]
    fn parse_distinguishes_paths_and_urls() {
        assert_eq!(
            IconRef::parse("/usr/share/icons/a.png"),
            IconRef::Path(PathBuf::from("/usr/share/icons/a.png"))
        );
        assert_eq!(
            IconRef::parse("https://example.com/a.png"),
            IconRef::Url("https://example.com/a.png".to_string())
        );
        assert_eq!(
            IconRef::parse("C:\\icons\\a.png"),
            IconRef::Path(PathBuf::from("C:\\icons\\a.png"))
        );
    }

    #[test]
    fn local_path_is_returned_unchanged() {
        let resolver = ResourceResolver::new("dobbin");
        let path = PathBuf::from("/tmp/does-not-need-to-exist.png");
        let resolved = resolver.resolve(&IconRef::Path(path.clone())).unwrap();
        assert_eq!(resolved, path);
        assert_eq!(resolver.temp_file_count(), 0);
    }

    #[test]
    fn file_url_maps_to_path_without_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let icon = tmp.path().join("icon.png");
        std::fs::write(&icon, PIXEL).unwrap();

        let url = Url::from_file_path(&icon).unwrap().to_string();
        let resolver = ResourceResolver::new("dobbin");
        let resolved = resolver.resolve(&IconRef::url(url)).unwrap();
        assert_eq!(resolved, icon);
        assert_eq!(resolver.temp_file_count(), 0);
    }

    #[test]
    fn embedded_resource_is_copied_once() {
        let resolver = ResourceResolver::new("dobbin");
        let icon = IconRef::embedded("idle-48.png", PIXEL);

        let first = resolver.resolve(&icon).unwrap();
        let second = resolver.resolve(&icon).unwrap();

        assert_eq!(first, second);
        assert_eq!(resolver.temp_file_count(), 1);
        assert_eq!(std::fs::read(&first).unwrap(), PIXEL);

        let name = first.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("dobbin"), "{name}");
        assert!(name.ends_with(".png"), "{name}");
    }

    /// Serve `body` for every request and count how many arrive.
    fn serve(body: &'static [u8]) -> (std::net::SocketAddr, std::sync::Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = std::sync::Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                counter.fetch_add(1, Ordering::SeqCst);

                let mut request = Vec::new();
                let mut buf = [0u8; 512];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(body);
            }
        });
        (addr, hits)
    }

    #[test]
    fn http_resource_is_downloaded_once() {
        let (addr, hits) = serve(PIXEL);
        let resolver = ResourceResolver::new("dobbin");
        let icon = IconRef::url(format!("http://{addr}/icons/busy.png"));

        let first = resolver.resolve(&icon).unwrap();
        let second = resolver.resolve(&icon).unwrap();

        assert_eq!(first, second);
        assert_eq!(resolver.temp_file_count(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(first.to_string_lossy().ends_with(".png"), "{first:?}");
        assert_eq!(std::fs::read(&first).unwrap(), PIXEL);
    }

    #[test]
    fn concurrent_resolution_creates_one_file() {
        let resolver = std::sync::Arc::new(ResourceResolver::new("dobbin"));
        let icon = IconRef::embedded("shared", PIXEL);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                let icon = icon.clone();
                std::thread::spawn(move || resolver.resolve(&icon).unwrap())
            })
            .collect();
        let paths: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(paths.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(resolver.temp_file_count(), 1);
        assert!(paths[0].to_string_lossy().ends_with(".img"));
    }

    #[test]
    fn cleanup_removes_temp_files() {
        let resolver = ResourceResolver::new("dobbin");
        let path = resolver
            .resolve(&IconRef::embedded("gone.png", PIXEL))
            .unwrap();
        assert!(path.exists());

        resolver.cleanup();
        assert!(!path.exists());
        assert_eq!(resolver.temp_file_count(), 0);
    }

    #[test]
    fn drop_removes_temp_files() {
        let path = {
            let resolver = ResourceResolver::new("dobbin");
            resolver
                .resolve(&IconRef::embedded("dropped.png", PIXEL))
                .unwrap()
        };
        assert!(!path.exists());
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let resolver = ResourceResolver::new("dobbin");
        let err = resolver
            .resolve(&IconRef::url("ftp://example.com/icon.png"))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedLocator(_)), "{err}");
        assert_eq!(resolver.temp_file_count(), 0);
    }
}
