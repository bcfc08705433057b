//! Tool dispatch: argument validation, component calls, result shaping.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Method;
use rmcp::model::*;
use serde_json::{json, Map, Value};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::TokenManager;
use crate::config::Settings;
use crate::content::ContentPipeline;
use crate::error::ConnectorError;
use crate::graph::types::{
    children_path, DocumentMetadata, Drive, DriveItem, FolderSummary, LibrarySummary, Site,
    SiteInfo,
};
use crate::graph::{GraphClient, LibraryReference, Location, RequestBody, SiteReference, SiteResolver};
use crate::tree::FolderTreeBuilder;
use crate::utils::{input_schema, structured_result, tool_error_result};
use crate::Connector;

/// Graph's single-request upload limit.
pub const MAX_UPLOAD_BYTES: usize = 4 * 1024 * 1024;

const DEFAULT_SEARCH_LIMIT: u64 = 25;
const MAX_SEARCH_LIMIT: u64 = 200;

type Args = Map<String, Value>;

pub struct SharePointConnector {
    settings: Settings,
    sites: Arc<SiteResolver>,
    trees: FolderTreeBuilder,
    content: ContentPipeline,
}

impl SharePointConnector {
    pub fn new(settings: Settings, graph: GraphClient) -> Self {
        Self {
            settings,
            trees: FolderTreeBuilder::new(graph.clone()),
            content: ContentPipeline::new(graph.clone()),
            sites: Arc::new(SiteResolver::new(graph)),
        }
    }

    pub fn from_settings(settings: Settings) -> Result<Self, ConnectorError> {
        let tokens = TokenManager::from_settings(&settings)?;
        let graph = GraphClient::from_settings(&settings, tokens)?;
        Ok(Self::new(settings, graph))
    }

    fn graph(&self) -> &GraphClient {
        self.sites.graph()
    }

    async fn site(&self, args: &Args) -> Result<SiteReference, ConnectorError> {
        let site_url = optional_str(args, "site_url")?
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.settings.site_url);
        self.sites.resolve(site_url).await
    }

    async fn locate(&self, args: &Args, path: &str) -> Result<Location, ConnectorError> {
        let site = self.site(args).await?;
        self.sites.locate(&site, path).await
    }

    /// Fetches an item that must exist and be a folder.
    async fn folder_item(&self, location: &Location) -> Result<DriveItem, ConnectorError> {
        let item: DriveItem = self
            .graph()
            .get_json(&location.item_endpoint(), &[])
            .await
            .map_err(|err| not_found_as(err, "folder", location))?;
        if !item.is_folder() {
            return Err(ConnectorError::permanent(
                None,
                format!("'{}' is not a folder", location.display_path()),
            ));
        }
        Ok(item)
    }

    async fn list_children(&self, args: &Args) -> Result<(Location, Vec<DriveItem>), ConnectorError> {
        let path = optional_str(args, "path")?.unwrap_or("");
        let location = self.locate(args, path).await?;
        let folder = self.folder_item(&location).await?;
        let children = self
            .graph()
            .paginate::<DriveItem>(&children_path(&location.drive_id, &folder.id), &[])
            .collect_all()
            .await?;
        Ok((location, children))
    }

    async fn get_site_info(&self, args: &Args) -> Result<CallToolResult, ConnectorError> {
        let site = self.site(args).await?;
        let raw: Site = self
            .graph()
            .get_json(&format!("sites/{}", site.site_id), &[])
            .await?;
        structured_result(&SiteInfo::from(raw))
    }

    async fn list_document_libraries(&self, args: &Args) -> Result<CallToolResult, ConnectorError> {
        let site = self.site(args).await?;
        let drives: Vec<Drive> = self
            .graph()
            .paginate(&format!("sites/{}/drives", site.site_id), &[])
            .collect_all()
            .await?;
        let libraries: Vec<LibrarySummary> = drives.into_iter().map(LibrarySummary::from).collect();
        structured_result(&json!({
            "site_id": site.site_id,
            "count": libraries.len(),
            "libraries": libraries,
        }))
    }

    async fn search_sharepoint(&self, args: &Args) -> Result<CallToolResult, ConnectorError> {
        let query = required_str(args, "query")?;
        let limit = optional_u64(args, "limit")?.unwrap_or(DEFAULT_SEARCH_LIMIT);
        if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
            return Err(ConnectorError::InvalidParams(format!(
                "limit must be between 1 and {}",
                MAX_SEARCH_LIMIT
            )));
        }
        let limit = limit as usize;

        let site = self.site(args).await?;
        let libraries = self.sites.libraries(&site).await?;
        let default_library = self.sites.locate(&site, "").await?;

        // OData string literals escape a single quote by doubling it.
        let escaped = query.replace('\'', "''");
        let endpoint = format!(
            "sites/{}/drive/root/search(q='{}')",
            site.site_id,
            urlencoding::encode(&escaped)
        );
        let page_size = limit.to_string();
        let mut pages = self
            .graph()
            .paginate::<DriveItem>(&endpoint, &[("$top", page_size.as_str())]);

        let mut results = Vec::new();
        'pages: while let Some(batch) = pages.next_page().await? {
            for item in batch.iter().filter(|item| !item.is_folder()) {
                let drive_id = item
                    .parent_reference
                    .as_ref()
                    .and_then(|p| p.drive_id.clone())
                    .unwrap_or_else(|| default_library.drive_id.clone());
                let path = search_hit_path(&libraries, &default_library, item);
                results.push(DocumentMetadata::from_item(item, path, &drive_id));
                if results.len() >= limit {
                    break 'pages;
                }
            }
        }
        info!(query, hits = results.len(), "search finished");

        structured_result(&json!({
            "query": query,
            "count": results.len(),
            "results": results,
        }))
    }

    async fn list_folders(&self, args: &Args) -> Result<CallToolResult, ConnectorError> {
        let (location, children) = self.list_children(args).await?;
        let folders: Vec<FolderSummary> = children
            .iter()
            .filter(|item| item.is_folder())
            .map(|item| FolderSummary::from_item(item, location.child(&item.name).display_path()))
            .collect();
        structured_result(&json!({
            "path": location.display_path(),
            "count": folders.len(),
            "folders": folders,
        }))
    }

    async fn list_documents(&self, args: &Args) -> Result<CallToolResult, ConnectorError> {
        let (location, children) = self.list_children(args).await?;
        let documents: Vec<DocumentMetadata> = children
            .iter()
            .filter(|item| !item.is_folder())
            .map(|item| {
                DocumentMetadata::from_item(
                    item,
                    location.child(&item.name).display_path(),
                    &location.drive_id,
                )
            })
            .collect();
        structured_result(&json!({
            "path": location.display_path(),
            "count": documents.len(),
            "documents": documents,
        }))
    }

    async fn get_folder_tree(&self, args: &Args) -> Result<CallToolResult, ConnectorError> {
        let path = optional_str(args, "path")?.unwrap_or("");
        let ceiling = self.settings.max_folder_depth;
        let max_depth = match optional_u64(args, "max_depth")? {
            Some(depth) if depth > u64::from(ceiling) => {
                return Err(ConnectorError::InvalidParams(format!(
                    "max_depth must be between 0 and {}",
                    ceiling
                )))
            }
            Some(depth) => depth as u32,
            None => ceiling,
        };
        let max_children = match optional_u64(args, "max_children")? {
            Some(0) => {
                return Err(ConnectorError::InvalidParams(
                    "max_children must be at least 1".to_string(),
                ))
            }
            other => other.map(|n| n as usize),
        };

        let location = self.locate(args, path).await?;
        let tree = self.trees.build_tree(&location, max_depth, max_children).await?;
        structured_result(&tree)
    }

    async fn get_document_content(&self, args: &Args) -> Result<CallToolResult, ConnectorError> {
        let path = required_str(args, "path")?;
        let max_chars = positive_or(args, "max_chars", self.settings.max_text_chars)?;
        let max_rows = positive_or(args, "max_rows", self.settings.max_rows)?;

        let location = self.locate(args, path).await?;
        if location.is_root() {
            return Err(ConnectorError::InvalidParams(format!(
                "'{}' is a library, not a document",
                location.display_path()
            )));
        }
        let mut document = self.content.get_document(&location).await?;
        document.content.truncate(max_chars, max_rows);
        structured_result(&document)
    }

    async fn create_folder(&self, args: &Args) -> Result<CallToolResult, ConnectorError> {
        let path = required_str(args, "path")?;
        let location = self.locate(args, path).await?;
        let (parent, name) = location.parent_and_name().ok_or_else(|| {
            ConnectorError::InvalidParams("path must name a folder inside a library".to_string())
        })?;
        let parent_item = self.folder_item(&parent).await?;

        let body = RequestBody::Json(json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "fail",
        }));
        let mut retried = 0;
        let outcome = self
            .graph()
            .request_counting_retries(
                Method::POST,
                &children_path(&location.drive_id, &parent_item.id),
                Some(&body),
                &[],
                &mut retried,
            )
            .await;
        let created: DriveItem = match outcome {
            Ok(response) => response.json()?,
            // An attempt that timed out or hit a 5xx may still have created the folder.
            Err(ConnectorError::Permanent {
                status: Some(409), ..
            }) if retried > 0 => {
                info!(
                    path = %location.display_path(),
                    retried,
                    "folder conflict after a retried create, checking earlier attempt"
                );
                self.folder_item(&location).await?
            }
            Err(err) => return Err(err),
        };
        info!(path = %location.display_path(), "created folder");
        structured_result(&FolderSummary::from_item(&created, location.display_path()))
    }

    async fn upload_document(&self, args: &Args) -> Result<CallToolResult, ConnectorError> {
        let path = required_str(args, "path")?;
        let (bytes, default_type) = match (
            optional_str(args, "content_base64")?,
            optional_str(args, "content_text")?,
        ) {
            (Some(encoded), None) => (
                base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| {
                        ConnectorError::InvalidParams(format!("content_base64 is not valid base64: {}", e))
                    })?,
                "application/octet-stream",
            ),
            (None, Some(text)) => (text.as_bytes().to_vec(), "text/plain; charset=utf-8"),
            _ => {
                return Err(ConnectorError::InvalidParams(
                    "provide exactly one of 'content_base64' or 'content_text'".to_string(),
                ))
            }
        };
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(ConnectorError::InvalidParams(format!(
                "content is {} bytes; uploads are limited to {} bytes",
                bytes.len(),
                MAX_UPLOAD_BYTES
            )));
        }
        let content_type = optional_str(args, "content_type")?
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(default_type)
            .to_string();

        let location = self.locate(args, path).await?;
        if location.is_root() {
            return Err(ConnectorError::InvalidParams(
                "path must name a file inside a library".to_string(),
            ));
        }
        let size = bytes.len();
        let body = RequestBody::Bytes {
            content: bytes,
            content_type,
        };
        let uploaded: DriveItem = self
            .graph()
            .request(
                Method::PUT,
                &format!("{}:/content", location.item_endpoint()),
                Some(&body),
                &[],
            )
            .await?
            .json()?;
        info!(path = %location.display_path(), size, "uploaded document");
        structured_result(&DocumentMetadata::from_item(
            &uploaded,
            location.display_path(),
            &location.drive_id,
        ))
    }

    async fn delete_item(&self, args: &Args) -> Result<CallToolResult, ConnectorError> {
        let path = required_str(args, "path")?;
        let location = self.locate(args, path).await?;
        if location.is_root() {
            return Err(ConnectorError::InvalidParams(
                "refusing to delete a document library".to_string(),
            ));
        }
        self.graph()
            .request(Method::DELETE, &location.item_endpoint(), None, &[])
            .await
            .map_err(|err| not_found_as(err, "item", &location))?;
        info!(path = %location.display_path(), "deleted item");
        structured_result(&json!({
            "deleted": true,
            "path": location.display_path(),
        }))
    }
}

fn not_found_as(err: ConnectorError, what: &str, location: &Location) -> ConnectorError {
    match err {
        ConnectorError::NotFound(_) => ConnectorError::NotFound(format!(
            "{} '{}' does not exist",
            what,
            location.display_path()
        )),
        other => other,
    }
}

/// Server-relative path of a search hit, rebuilt from its parent reference
/// (`/drives/{id}/root:/Folder/Sub`).
fn search_hit_path(
    libraries: &[LibraryReference],
    default_library: &Location,
    item: &DriveItem,
) -> String {
    let parent = item.parent_reference.as_ref();
    let library = parent
        .and_then(|p| p.drive_id.as_deref())
        .and_then(|id| libraries.iter().find(|lib| lib.drive_id == id))
        .map(|lib| lib.url_segment.as_str())
        .unwrap_or(default_library.library.as_str());
    let folder = parent
        .and_then(|p| p.path.as_deref())
        .and_then(|p| p.split_once("root:"))
        .map(|(_, rest)| rest.trim_matches('/'))
        .unwrap_or("");

    if folder.is_empty() {
        format!("/{}/{}", library, item.name)
    } else {
        format!("/{}/{}/{}", library, folder, item.name)
    }
}

fn optional_str<'a>(args: &'a Args, key: &str) -> Result<Option<&'a str>, ConnectorError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ConnectorError::InvalidParams(format!("'{}' must be a string", key))),
    }
}

fn required_str<'a>(args: &'a Args, key: &str) -> Result<&'a str, ConnectorError> {
    optional_str(args, key)?
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ConnectorError::InvalidParams(format!("Missing '{}' parameter", key)))
}

fn optional_u64(args: &Args, key: &str) -> Result<Option<u64>, ConnectorError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
            ConnectorError::InvalidParams(format!("'{}' must be a non-negative integer", key))
        }),
        Some(_) => Err(ConnectorError::InvalidParams(format!(
            "'{}' must be a non-negative integer",
            key
        ))),
    }
}

fn positive_or(args: &Args, key: &str, default: usize) -> Result<usize, ConnectorError> {
    match optional_u64(args, key)? {
        Some(0) => Err(ConnectorError::InvalidParams(format!("'{}' must be at least 1", key))),
        Some(n) => Ok(n as usize),
        None => Ok(default),
    }
}

fn site_url_property() -> Value {
    json!({
        "type": "string",
        "description": "Site URL, e.g. https://contoso.sharepoint.com/sites/Marketing. Defaults to the configured site."
    })
}

fn path_property(description: &'static str) -> Value {
    json!({ "type": "string", "description": description })
}

fn tool(name: &'static str, description: &'static str, schema: Value) -> Tool {
    Tool {
        name: Cow::Borrowed(name),
        title: None,
        description: Some(Cow::Borrowed(description)),
        input_schema: input_schema(schema),
        output_schema: None,
        annotations: None,
        icons: None,
    }
}

fn tool_catalogue(max_folder_depth: u32) -> Vec<Tool> {
    vec![
        tool(
            "get_site_info",
            "Get basic information about a SharePoint site: name, description, timestamps and URL.",
            json!({
                "type": "object",
                "properties": { "site_url": site_url_property() }
            }),
        ),
        tool(
            "list_document_libraries",
            "List the document libraries (drives) of a site.",
            json!({
                "type": "object",
                "properties": { "site_url": site_url_property() }
            }),
        ),
        tool(
            "search_sharepoint",
            "Search documents in the site's default library by keyword. Returns document metadata.",
            json!({
                "type": "object",
                "properties": {
                    "site_url": site_url_property(),
                    "query": { "type": "string", "description": "Search terms" },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results",
                        "minimum": 1,
                        "maximum": MAX_SEARCH_LIMIT,
                        "default": DEFAULT_SEARCH_LIMIT
                    }
                },
                "required": ["query"]
            }),
        ),
        tool(
            "list_folders",
            "List the folders directly inside a folder. Omit path for the default library root.",
            json!({
                "type": "object",
                "properties": {
                    "site_url": site_url_property(),
                    "path": path_property("Folder path, e.g. /Shared Documents/Reports")
                }
            }),
        ),
        tool(
            "list_documents",
            "List the documents directly inside a folder with their metadata.",
            json!({
                "type": "object",
                "properties": {
                    "site_url": site_url_property(),
                    "path": path_property("Folder path, e.g. /Shared Documents/Reports")
                }
            }),
        ),
        tool(
            "get_folder_tree",
            "Get the folder hierarchy below a path, breadth-first, bounded by depth and per-folder child count.",
            json!({
                "type": "object",
                "properties": {
                    "site_url": site_url_property(),
                    "path": path_property("Root folder of the tree"),
                    "max_depth": {
                        "type": "integer",
                        "description": "Levels to expand below the root; 0 returns the root only",
                        "minimum": 0,
                        "maximum": max_folder_depth,
                        "default": max_folder_depth
                    },
                    "max_children": {
                        "type": "integer",
                        "description": "Stop listing a folder after this many children",
                        "minimum": 1
                    }
                }
            }),
        ),
        tool(
            "get_document_content",
            "Get a document's metadata and extracted text. Supports txt, md, csv, tsv, html, docx, xlsx and pdf.",
            json!({
                "type": "object",
                "properties": {
                    "site_url": site_url_property(),
                    "path": path_property("Document path, e.g. /Shared Documents/Reports/q3.docx"),
                    "max_chars": {
                        "type": "integer",
                        "description": "Truncate extracted text to this many characters",
                        "minimum": 1
                    },
                    "max_rows": {
                        "type": "integer",
                        "description": "Truncate each table to this many rows",
                        "minimum": 1
                    }
                },
                "required": ["path"]
            }),
        ),
        tool(
            "create_folder",
            "Create a folder. The parent folder must exist; an existing name is an error.",
            json!({
                "type": "object",
                "properties": {
                    "site_url": site_url_property(),
                    "path": path_property("Path of the new folder")
                },
                "required": ["path"]
            }),
        ),
        tool(
            "upload_document",
            "Upload a document of up to 4 MiB, replacing any file at the same path.",
            json!({
                "type": "object",
                "properties": {
                    "site_url": site_url_property(),
                    "path": path_property("Destination path including the file name"),
                    "content_base64": { "type": "string", "description": "File content, base64 encoded" },
                    "content_text": { "type": "string", "description": "File content as UTF-8 text" },
                    "content_type": { "type": "string", "description": "MIME type sent with the upload" }
                },
                "required": ["path"]
            }),
        ),
        tool(
            "delete_item",
            "Delete a document or folder (moves it to the site recycle bin).",
            json!({
                "type": "object",
                "properties": {
                    "site_url": site_url_property(),
                    "path": path_property("Path of the item to delete")
                },
                "required": ["path"]
            }),
        ),
    ]
}

#[async_trait]
impl Connector for SharePointConnector {
    fn name(&self) -> &'static str {
        "sharepoint"
    }

    fn description(&self) -> &'static str {
        "Read and manage SharePoint document libraries through Microsoft Graph."
    }

    async fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: Some(false),
            }),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
    ) -> Result<ListToolsResult, ConnectorError> {
        Ok(ListToolsResult {
            tools: tool_catalogue(self.settings.max_folder_depth),
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ConnectorError> {
        let name = request.name.as_ref();
        let args = request.arguments.unwrap_or_default();
        info!(tool = name, "tool called");

        let outcome = match name {
            "get_site_info" => self.get_site_info(&args).await,
            "list_document_libraries" => self.list_document_libraries(&args).await,
            "search_sharepoint" => self.search_sharepoint(&args).await,
            "list_folders" => self.list_folders(&args).await,
            "list_documents" => self.list_documents(&args).await,
            "get_folder_tree" => self.get_folder_tree(&args).await,
            "get_document_content" => self.get_document_content(&args).await,
            "create_folder" => self.create_folder(&args).await,
            "upload_document" => self.upload_document(&args).await,
            "delete_item" => self.delete_item(&args).await,
            _ => return Err(ConnectorError::ToolNotFound(name.to_string())),
        };

        Ok(outcome.unwrap_or_else(|err| {
            warn!(tool = name, kind = err.code_str(), "tool failed: {}", err);
            tool_error_result(&err)
        }))
    }
}
