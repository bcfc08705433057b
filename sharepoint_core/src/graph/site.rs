//! Site and document-library resolution.
//!
//! Tool callers speak in site URLs and server-relative paths such as
//! `/Shared Documents/Reports/q3.xlsx`. Graph wants a site id, a drive id and a
//! drive-relative path. Site and library lookups are cached for the life of the
//! process; item lookups never are.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use super::types::{Drive, Site};
use super::GraphClient;
use crate::error::ConnectorError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteReference {
    pub host: String,
    /// Empty for the tenant root site, otherwise e.g. `/sites/Marketing`.
    pub site_path: String,
    pub site_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LibraryReference {
    pub drive_id: String,
    pub name: String,
    /// Last segment of the library URL, e.g. `Shared Documents`.
    pub url_segment: String,
    pub web_url: Option<String>,
}

/// A resolved item address inside one document library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub drive_id: String,
    pub library: String,
    /// Drive-relative path without leading slash; empty for the library root.
    pub item_path: String,
}

impl Location {
    pub fn is_root(&self) -> bool {
        self.item_path.is_empty()
    }

    /// Graph path addressing this item by path.
    pub fn item_endpoint(&self) -> String {
        if self.is_root() {
            format!("drives/{}/root", self.drive_id)
        } else {
            format!("drives/{}/root:/{}", self.drive_id, encode_path(&self.item_path))
        }
    }

    /// Server-relative path as shown to callers.
    pub fn display_path(&self) -> String {
        if self.is_root() {
            format!("/{}", self.library)
        } else {
            format!("/{}/{}", self.library, self.item_path)
        }
    }

    pub fn child(&self, name: &str) -> Location {
        let item_path = if self.is_root() {
            name.to_string()
        } else {
            format!("{}/{}", self.item_path, name)
        };
        Location {
            item_path,
            ..self.clone()
        }
    }

    /// Splits off the last segment; `None` for the library root.
    pub fn parent_and_name(&self) -> Option<(Location, String)> {
        if self.is_root() {
            return None;
        }
        let (parent, name) = match self.item_path.rsplit_once('/') {
            Some((parent, name)) => (parent.to_string(), name.to_string()),
            None => (String::new(), self.item_path.clone()),
        };
        Some((
            Location {
                item_path: parent,
                ..self.clone()
            },
            name,
        ))
    }
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Splits a caller path into clean segments, refusing parent traversal.
pub fn split_path(path: &str) -> Result<Vec<String>, ConnectorError> {
    let mut segments = Vec::new();
    for raw in path.split(['/', '\\']) {
        let segment = raw.trim();
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(ConnectorError::InvalidParams(format!(
                    "path '{}' must not contain '..' segments",
                    path
                )))
            }
            other => segments.push(other.to_string()),
        }
    }
    Ok(segments)
}

/// Splits `https://host/sites/Name/...` into `(host, "/sites/Name")`.
pub fn parse_site_url(site_url: &str) -> Result<(String, String), ConnectorError> {
    let url = url::Url::parse(site_url.trim()).map_err(|e| {
        ConnectorError::InvalidParams(format!("invalid site URL '{}': {}", site_url, e))
    })?;
    let host = url
        .host_str()
        .ok_or_else(|| ConnectorError::InvalidParams(format!("site URL '{}' has no host", site_url)))?
        .to_string();
    let segments: Vec<String> = url
        .path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(|s| {
                    urlencoding::decode(s)
                        .map(|d| d.into_owned())
                        .unwrap_or_else(|_| s.to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    let site_path = match segments.as_slice() {
        [kind, name, ..] if kind.eq_ignore_ascii_case("sites") || kind.eq_ignore_ascii_case("teams") => {
            format!("/{}/{}", kind, name)
        }
        _ => String::new(),
    };
    Ok((host, site_path))
}

fn library_segment(drive: &Drive) -> String {
    drive
        .web_url
        .as_deref()
        .and_then(|url| url.trim_end_matches('/').rsplit('/').next())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .or_else(|| drive.name.clone())
        .unwrap_or_else(|| drive.id.clone())
}

pub struct SiteResolver {
    graph: GraphClient,
    sites: RwLock<HashMap<String, SiteReference>>,
    libraries: RwLock<HashMap<String, Arc<Vec<LibraryReference>>>>,
}

impl SiteResolver {
    pub fn new(graph: GraphClient) -> Self {
        Self {
            graph,
            sites: RwLock::new(HashMap::new()),
            libraries: RwLock::new(HashMap::new()),
        }
    }

    pub fn graph(&self) -> &GraphClient {
        &self.graph
    }

    /// Resolves a site URL to its Graph id. Cached after the first success.
    pub async fn resolve(&self, site_url: &str) -> Result<SiteReference, ConnectorError> {
        let (host, site_path) = parse_site_url(site_url)?;
        let key = format!("{}{}", host, site_path).to_lowercase();

        let cached = self
            .sites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(site) = cached {
            return Ok(site);
        }

        let endpoint = if site_path.is_empty() {
            format!("sites/{}", host)
        } else {
            format!("sites/{}:{}", host, encode_path(&site_path))
        };
        let site: Site = self.graph.get_json(&endpoint, &[]).await.map_err(|err| match err {
            ConnectorError::NotFound(_) => {
                ConnectorError::NotFound(format!("site '{}' was not found", site_url))
            }
            other => other,
        })?;

        let reference = SiteReference {
            host,
            site_path,
            site_id: site.id,
        };
        info!(site_id = %reference.site_id, "resolved site {}", site_url);
        self.sites
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert_with(|| reference.clone());
        Ok(reference)
    }

    /// Document libraries of a site, in the order Graph lists them.
    pub async fn libraries(
        &self,
        site: &SiteReference,
    ) -> Result<Arc<Vec<LibraryReference>>, ConnectorError> {
        let cached = self
            .libraries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&site.site_id)
            .cloned();
        if let Some(libraries) = cached {
            return Ok(libraries);
        }

        let drives: Vec<Drive> = self
            .graph
            .paginate(&format!("sites/{}/drives", site.site_id), &[])
            .collect_all()
            .await?;
        let libraries: Arc<Vec<LibraryReference>> = Arc::new(
            drives
                .iter()
                .map(|drive| LibraryReference {
                    drive_id: drive.id.clone(),
                    name: drive.name.clone().unwrap_or_else(|| library_segment(drive)),
                    url_segment: library_segment(drive),
                    web_url: drive.web_url.clone(),
                })
                .collect(),
        );
        debug!(count = libraries.len(), "cached document libraries for {}", site.site_id);
        self.libraries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(site.site_id.clone(), Arc::clone(&libraries));
        Ok(libraries)
    }

    /// Maps a server-relative path onto a library and drive-relative path.
    ///
    /// The first segment selects a library by URL segment or display name. Paths
    /// that do not start with a library name address the site's default library.
    /// A leading site prefix (`/sites/Name/...`) is ignored.
    pub async fn locate(&self, site: &SiteReference, path: &str) -> Result<Location, ConnectorError> {
        let mut segments = split_path(path)?;
        let site_segments = split_path(&site.site_path)?;
        if !site_segments.is_empty()
            && segments.len() >= site_segments.len()
            && segments
                .iter()
                .zip(site_segments.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
        {
            segments.drain(..site_segments.len());
        }

        let libraries = self.libraries(site).await?;
        let matched = segments.first().and_then(|first| {
            libraries.iter().find(|lib| {
                lib.url_segment.eq_ignore_ascii_case(first) || lib.name.eq_ignore_ascii_case(first)
            })
        });

        let (library, rest) = match matched {
            Some(library) => (library, &segments[1..]),
            None => {
                let default = libraries
                    .iter()
                    .find(|lib| {
                        lib.url_segment.eq_ignore_ascii_case("Shared Documents")
                            || lib.name.eq_ignore_ascii_case("Documents")
                    })
                    .or_else(|| libraries.first())
                    .ok_or_else(|| {
                        ConnectorError::NotFound("site has no document libraries".to_string())
                    })?;
                (default, &segments[..])
            }
        };

        Ok(Location {
            drive_id: library.drive_id.clone(),
            library: library.url_segment.clone(),
            item_path: rest.join("/"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_site_urls() {
        assert_eq!(
            parse_site_url("https://contoso.sharepoint.com/sites/Marketing/SitePages/Home.aspx")
                .unwrap(),
            ("contoso.sharepoint.com".to_string(), "/sites/Marketing".to_string())
        );
        assert_eq!(
            parse_site_url("https://contoso.sharepoint.com/").unwrap(),
            ("contoso.sharepoint.com".to_string(), String::new())
        );
        assert_eq!(
            parse_site_url("https://contoso.sharepoint.com/teams/Dev%20Ops").unwrap().1,
            "/teams/Dev Ops"
        );
        assert!(parse_site_url("not a url").is_err());
    }

    #[test]
    fn split_path_rejects_traversal() {
        assert_eq!(
            split_path("/Shared Documents//Reports/").unwrap(),
            vec!["Shared Documents", "Reports"]
        );
        assert!(split_path("/Shared Documents/../secret").is_err());
    }

    #[test]
    fn location_endpoints_are_encoded() {
        let root = Location {
            drive_id: "b!1".into(),
            library: "Shared Documents".into(),
            item_path: String::new(),
        };
        assert_eq!(root.item_endpoint(), "drives/b!1/root");
        assert_eq!(root.display_path(), "/Shared Documents");

        let report = root.child("Q3 Report#1.pdf");
        assert_eq!(report.item_endpoint(), "drives/b!1/root:/Q3%20Report%231.pdf");
        assert_eq!(report.display_path(), "/Shared Documents/Q3 Report#1.pdf");

        let nested = report.child("x");
        let (parent, name) = nested.parent_and_name().unwrap();
        assert_eq!(parent, report);
        assert_eq!(name, "x");
        assert!(root.parent_and_name().is_none());
    }
}
