use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::store::{NodeKey, NodeName};

pub trait ChunkKeyEncoder {
    /// Append the encoded chunk key for the given grid coordinates
    /// onto the array's own key.
    fn chunk_key(&self, array_key: &NodeKey, coord: &[u64]) -> NodeKey;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    #[serde(rename = "/")]
    Slash,
    #[serde(rename = ".")]
    Dot,
}

impl Display for Separator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Separator::Slash => write!(f, "/"),
            Separator::Dot => write!(f, "."),
        }
    }
}

fn slash() -> Separator {
    Separator::Slash
}

fn dot() -> Separator {
    Separator::Dot
}

/// Join string tokens into key components: a slash separator makes
/// each token its own component, a dot separator packs them into one.
fn extend_key(key: &mut NodeKey, sep: Separator, tokens: Vec<String>) {
    match sep {
        Separator::Slash => {
            for t in tokens {
                key.push(NodeName::new_unchecked(t));
            }
        }
        Separator::Dot => {
            key.push(NodeName::new_unchecked(tokens.join(".")));
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DefaultChunkKeyEncoding {
    #[serde(default = "slash")]
    separator: Separator,
}

impl DefaultChunkKeyEncoding {
    pub fn new(separator: Separator) -> Self {
        Self { separator }
    }
}

impl ChunkKeyEncoder for DefaultChunkKeyEncoding {
    fn chunk_key(&self, array_key: &NodeKey, coord: &[u64]) -> NodeKey {
        let mut key = array_key.clone();
        let mut tokens = vec!["c".to_owned()];
        tokens.extend(coord.iter().map(|n| n.to_string()));
        extend_key(&mut key, self.separator, tokens);
        key
    }
}

impl Default for DefaultChunkKeyEncoding {
    fn default() -> Self {
        Self {
            separator: Separator::Slash,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct V2ChunkKeyEncoding {
    #[serde(default = "dot")]
    separator: Separator,
}

impl V2ChunkKeyEncoding {
    pub fn new(separator: Separator) -> Self {
        Self { separator }
    }
}

impl ChunkKeyEncoder for V2ChunkKeyEncoding {
    fn chunk_key(&self, array_key: &NodeKey, coord: &[u64]) -> NodeKey {
        let mut key = array_key.clone();
        let tokens: Vec<_> = if coord.is_empty() {
            vec!["0".to_owned()]
        } else {
            coord.iter().map(|n| n.to_string()).collect()
        };
        extend_key(&mut key, self.separator, tokens);
        key
    }
}

impl Default for V2ChunkKeyEncoding {
    fn default() -> Self {
        Self {
            separator: Separator::Dot,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "name", content = "configuration", rename_all = "lowercase")]
pub enum ChunkKeyEncoding {
    Default(DefaultChunkKeyEncoding),
    V2(V2ChunkKeyEncoding),
}

impl ChunkKeyEncoder for ChunkKeyEncoding {
    fn chunk_key(&self, array_key: &NodeKey, coord: &[u64]) -> NodeKey {
        match self {
            Self::Default(e) => e.chunk_key(array_key, coord),
            Self::V2(e) => e.chunk_key(array_key, coord),
        }
    }
}

impl Default for ChunkKeyEncoding {
    fn default() -> Self {
        Self::Default(DefaultChunkKeyEncoding::default())
    }
}

impl From<DefaultChunkKeyEncoding> for ChunkKeyEncoding {
    fn from(e: DefaultChunkKeyEncoding) -> Self {
        Self::Default(e)
    }
}

impl From<V2ChunkKeyEncoding> for ChunkKeyEncoding {
    fn from(e: V2ChunkKeyEncoding) -> Self {
        Self::V2(e)
    }
}
