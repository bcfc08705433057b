//! Forward-only cursor over `@odata.nextLink` continuation links.
//!
//! A [`Pages`] value issues one request per [`Pages::next_page`] call and nothing
//! before the first call. Continuation links are single use, so the cursor cannot be
//! rewound: once it returns `None`, or an error, it stays exhausted.

use futures::stream::{self, Stream};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::VecDeque;
use std::marker::PhantomData;

use super::GraphClient;
use crate::error::ConnectorError;

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

enum Cursor {
    Start {
        path: String,
        query: Vec<(String, String)>,
    },
    Next(String),
}

pub struct Pages<T> {
    client: GraphClient,
    cursor: Option<Cursor>,
    pages_fetched: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T> Pages<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub(crate) fn new(client: GraphClient, path: &str, query: &[(&str, &str)]) -> Self {
        Self {
            client,
            cursor: Some(Cursor::Start {
                path: path.to_string(),
                query: query
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }),
            pages_fetched: 0,
            _item: PhantomData,
        }
    }

    /// Fetches the next page, or `None` once the collection is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<T>>, ConnectorError> {
        let Some(cursor) = self.cursor.take() else {
            return Ok(None);
        };
        let page: Page<T> = match &cursor {
            Cursor::Start { path, query } => {
                let query: Vec<(&str, &str)> = query
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                self.client.get_json(path, &query).await?
            }
            Cursor::Next(link) => self.client.get_json(link, &[]).await?,
        };
        self.pages_fetched += 1;
        self.cursor = page.next_link.map(Cursor::Next);
        Ok(Some(page.value))
    }

    /// True once no further request will be made.
    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_none()
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Flattens the pages into a lazy item stream in page order.
    pub fn into_items(self) -> impl Stream<Item = Result<T, ConnectorError>> + Send {
        stream::try_unfold(
            (self, VecDeque::new()),
            |(mut pages, mut buffered): (Self, VecDeque<T>)| async move {
                loop {
                    if let Some(item) = buffered.pop_front() {
                        return Ok(Some((item, (pages, buffered))));
                    }
                    match pages.next_page().await? {
                        Some(batch) => buffered.extend(batch),
                        None => return Ok(None),
                    }
                }
            },
        )
    }

    /// Drains every remaining page.
    pub async fn collect_all(mut self) -> Result<Vec<T>, ConnectorError> {
        let mut items = Vec::new();
        while let Some(batch) = self.next_page().await? {
            items.extend(batch);
        }
        Ok(items)
    }
}
