//! MongoDB-backed key-value store.
//!
//! Each key is one document `{ _id: <key>, v: <binary value> }`. `_id` is a
//! string when the key is valid UTF-8 so collections written by other
//! string-keyed datastores stay readable, and generic binary otherwise.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{StreamExt, TryStreamExt};
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{Binary, Bson, Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};

use super::engine::{EntryStream, KeyValueStore};
use crate::core::{Key, KeyValueEntry, StoreError, StoreResult};

pub const DEFAULT_COLLECTION: &str = "kvstore";
const ID_FIELD: &str = "_id";
const VALUE_FIELD: &str = "v";

pub struct RemoteStore {
    collection: Collection<Document>,
}

impl RemoteStore {
    /// Connect and verify the session with a `ping` against `database`.
    ///
    /// `timeout` bounds both socket connect and server selection.
    pub async fn connect(
        uri: &str,
        database: &str,
        collection: &str,
        timeout: Duration,
    ) -> StoreResult<Self> {
        let mut options = ClientOptions::parse(uri).await?;
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);
        if options.app_name.is_none() {
            options.app_name = Some("kvclone".to_string());
        }

        let client = Client::with_options(options)?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 }).await?;

        let collection = if collection.is_empty() {
            DEFAULT_COLLECTION
        } else {
            collection
        };
        tracing::debug!(database, collection, "remote store session established");
        Ok(Self {
            collection: db.collection::<Document>(collection),
        })
    }

    /// Remove the backing collection and every key in it.
    pub async fn drop_collection(&self) -> StoreResult<()> {
        self.collection.drop().await?;
        Ok(())
    }
}

fn key_to_bson(key: &Key) -> Bson {
    match key.as_str() {
        Some(text) => Bson::String(text.to_string()),
        None => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: key.as_bytes().to_vec(),
        }),
    }
}

fn key_from_bson(id: &Bson) -> StoreResult<Key> {
    match id {
        Bson::String(text) => Ok(Key::from(text.as_str())),
        Bson::Binary(binary) => Ok(Key::from(binary.bytes.clone())),
        other => Err(StoreError::Corrupt(format!(
            "unsupported document id type {:?}",
            other.element_type()
        ))),
    }
}

fn value_from_document(document: &Document) -> StoreResult<Vec<u8>> {
    match document.get(VALUE_FIELD) {
        Some(Bson::Binary(binary)) => Ok(binary.bytes.clone()),
        Some(Bson::String(text)) => Ok(text.clone().into_bytes()),
        Some(other) => Err(StoreError::Corrupt(format!(
            "unsupported value type {:?}",
            other.element_type()
        ))),
        None => Err(StoreError::Corrupt(format!(
            "document is missing field '{}'",
            VALUE_FIELD
        ))),
    }
}

/// Decode one stored document into an entry.
pub(crate) fn entry_from_document(document: &Document) -> StoreResult<KeyValueEntry> {
    let id = document
        .get(ID_FIELD)
        .ok_or_else(|| StoreError::Corrupt("document is missing '_id'".to_string()))?;
    Ok(KeyValueEntry {
        key: key_from_bson(id)?,
        value: value_from_document(document)?,
    })
}

/// Encode one entry as a stored document.
pub(crate) fn document_for(key: &Key, value: &[u8]) -> Document {
    let mut document = Document::new();
    document.insert(ID_FIELD, key_to_bson(key));
    document.insert(
        VALUE_FIELD,
        Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: value.to_vec(),
        }),
    );
    document
}

fn id_filter(key: &Key) -> Document {
    let mut filter = Document::new();
    filter.insert(ID_FIELD, key_to_bson(key));
    filter
}

#[async_trait]
impl KeyValueStore for RemoteStore {
    fn kind(&self) -> &'static str {
        "remote"
    }

    async fn scan(&self) -> StoreResult<EntryStream> {
        let cursor = self.collection.find(doc! {}).await?;
        let entries = cursor
            .map_err(StoreError::from)
            .and_then(|document| async move { entry_from_document(&document) });
        Ok(entries.boxed())
    }

    async fn put(&self, key: &Key, value: &[u8]) -> StoreResult<()> {
        self.collection
            .replace_one(id_filter(key), document_for(key, value))
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &Key) -> StoreResult<Option<Vec<u8>>> {
        let found = self.collection.find_one(id_filter(key)).await?;
        found.as_ref().map(value_from_document).transpose()
    }

    async fn len(&self) -> StoreResult<u64> {
        Ok(self.collection.count_documents(doc! {}).await?)
    }

    async fn close(&self) -> StoreResult<()> {
        // The connection pool is owned by the client behind the collection
        // handle and shuts down when the last handle is dropped.
        Ok(())
    }
}
