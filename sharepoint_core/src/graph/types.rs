//! Wire shapes for the Graph resources this crate reads, plus the projections
//! handed back to tool callers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: String,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub web_url: Option<String>,
    pub created_date_time: Option<String>,
    pub last_modified_date_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drive {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub web_url: Option<String>,
    pub drive_type: Option<String>,
    pub created_date_time: Option<String>,
    pub last_modified_date_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    pub size: Option<u64>,
    pub web_url: Option<String>,
    pub created_date_time: Option<String>,
    pub last_modified_date_time: Option<String>,
    pub folder: Option<FolderFacet>,
    pub file: Option<FileFacet>,
    pub created_by: Option<IdentitySet>,
    pub last_modified_by: Option<IdentitySet>,
    pub parent_reference: Option<ItemReference>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }

    pub fn child_count(&self) -> Option<u64> {
        self.folder.as_ref().and_then(|f| f.child_count)
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.file.as_ref().and_then(|f| f.mime_type.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    pub child_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFacet {
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentitySet {
    pub user: Option<Identity>,
    pub application: Option<Identity>,
}

impl IdentitySet {
    pub fn display_name(&self) -> Option<String> {
        self.user
            .as_ref()
            .or(self.application.as_ref())
            .and_then(|i| i.display_name.clone().or_else(|| i.email.clone()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub display_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReference {
    pub drive_id: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteInfo {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub web_url: Option<String>,
    pub created: Option<String>,
    pub last_modified: Option<String>,
}

impl From<Site> for SiteInfo {
    fn from(site: Site) -> Self {
        Self {
            id: site.id,
            name: site.display_name.or(site.name),
            description: site.description,
            web_url: site.web_url,
            created: site.created_date_time,
            last_modified: site.last_modified_date_time,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LibrarySummary {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub web_url: Option<String>,
    pub created: Option<String>,
    pub last_modified: Option<String>,
}

impl From<Drive> for LibrarySummary {
    fn from(drive: Drive) -> Self {
        Self {
            id: drive.id,
            name: drive.name,
            description: drive.description,
            web_url: drive.web_url,
            created: drive.created_date_time,
            last_modified: drive.last_modified_date_time,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderSummary {
    pub name: String,
    pub id: String,
    pub path: String,
    pub web_url: Option<String>,
    pub created: Option<String>,
    pub last_modified: Option<String>,
    pub child_count: Option<u64>,
}

impl FolderSummary {
    pub fn from_item(item: &DriveItem, path: String) -> Self {
        Self {
            name: item.name.clone(),
            id: item.id.clone(),
            path,
            web_url: item.web_url.clone(),
            created: item.created_date_time.clone(),
            last_modified: item.last_modified_date_time.clone(),
            child_count: item.child_count(),
        }
    }
}

/// Read-only projection of a document as Graph reported it at fetch time.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentMetadata {
    pub name: String,
    pub id: String,
    pub path: String,
    pub size: Option<u64>,
    pub created: Option<String>,
    pub last_modified: Option<String>,
    pub author: Option<String>,
    pub last_modified_by: Option<String>,
    pub mime_type: Option<String>,
    pub web_url: Option<String>,
    /// Graph path that serves the raw bytes.
    pub download_reference: String,
}

impl DocumentMetadata {
    pub fn from_item(item: &DriveItem, path: String, drive_id: &str) -> Self {
        Self {
            name: item.name.clone(),
            id: item.id.clone(),
            path,
            size: item.size,
            created: item.created_date_time.clone(),
            last_modified: item.last_modified_date_time.clone(),
            author: item.created_by.as_ref().and_then(|i| i.display_name()),
            last_modified_by: item.last_modified_by.as_ref().and_then(|i| i.display_name()),
            mime_type: item.mime_type().map(|s| s.to_string()),
            web_url: item.web_url.clone(),
            download_reference: content_path(drive_id, &item.id),
        }
    }
}

pub fn content_path(drive_id: &str, item_id: &str) -> String {
    format!("drives/{}/items/{}/content", drive_id, item_id)
}

pub fn children_path(drive_id: &str, item_id: &str) -> String {
    format!("drives/{}/items/{}/children", drive_id, item_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drive_item_projects_to_metadata() {
        let item: DriveItem = serde_json::from_value(json!({
            "id": "01ABC",
            "name": "report.pdf",
            "size": 2048,
            "webUrl": "https://contoso.sharepoint.com/sites/m/Shared%20Documents/report.pdf",
            "createdDateTime": "2024-01-02T03:04:05Z",
            "lastModifiedDateTime": "2024-02-03T04:05:06Z",
            "file": {"mimeType": "application/pdf"},
            "createdBy": {"user": {"displayName": "Ada Lovelace", "email": "ada@contoso.com"}},
            "lastModifiedBy": {"application": {"displayName": "Flow"}}
        }))
        .unwrap();

        let meta = DocumentMetadata::from_item(&item, "/Shared Documents/report.pdf".into(), "b!drive");
        assert_eq!(meta.size, Some(2048));
        assert_eq!(meta.created.as_deref(), Some("2024-01-02T03:04:05Z"));
        assert_eq!(meta.author.as_deref(), Some("Ada Lovelace"));
        assert_eq!(meta.last_modified_by.as_deref(), Some("Flow"));
        assert_eq!(meta.mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(meta.download_reference, "drives/b!drive/items/01ABC/content");
        assert!(!item.is_folder());
    }

    #[test]
    fn folder_facet_carries_child_count() {
        let item: DriveItem = serde_json::from_value(json!({
            "id": "F1", "name": "Specs", "folder": {"childCount": 12}
        }))
        .unwrap();
        assert!(item.is_folder());
        assert_eq!(item.child_count(), Some(12));
    }
}
