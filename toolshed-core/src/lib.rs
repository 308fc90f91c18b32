//! Toolshed Core Library
//!
//! Entity storage for the Toolshed utility collection:
//! - Storage adapter contract with soft reads and loud writes
//! - Local-storage, private-filesystem and SQLite adapters
//! - Entity id generation (content hash, UUID, timestamp, caller-supplied)
//! - Generic typed entity store with listing and pagination
//! - Adapter registry with capability-probed fallback chains
//! - Notes, chat sessions, geolocation profiles and the sound library

pub mod blob;
pub mod chat;
pub mod config;
pub mod entity_store;
pub mod factory;
pub mod geo;
pub mod id;
pub mod indexeddb;
pub mod local_storage;
pub mod notes;
pub mod opfs;
pub mod sound_library;
pub mod storage;

pub use blob::BlobRegistry;
pub use chat::{ChatMessage, ChatRole, ChatSession, ChatStore};
pub use config::StorageConfig;
pub use entity_store::{compare_values, Entity, EntityStore, Page, PaginateOptions, SortOrder, METADATA_ID};
pub use factory::{AdapterSelection, ProbeOutcome, StorageFactory, LARGE_PAYLOAD_CHAIN, SMALL_RECORD_CHAIN};
pub use geo::{GeoProfile, GeoProfileStore};
pub use id::{generate_id, IdStrategy};
pub use indexeddb::{DatabaseAdapter, INDEXED_DB};
pub use local_storage::{LocalStorageAdapter, LOCAL_STORAGE};
pub use notes::{Note, NoteStore};
pub use opfs::{FileSystemAdapter, OPFS};
pub use sound_library::{AudioFile, Folder, LibraryItem, LibraryMetadata, SoundLibrary, ROOT_FOLDER_ID};
pub use storage::{Result, StorageAdapter, StorageError};
