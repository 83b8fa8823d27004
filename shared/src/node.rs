//! Node inventory types
//!
//! Nodes and their tokens are produced by the inventory and token classifier;
//! the console consumes them as-is and never re-derives ids or types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Diagnostic item category, selects which command template applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenType {
    /// Fieldbus connection
    Fbc,
    /// Remote process connection
    Rpc,
    Log,
    Lis,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Fbc => "FBC",
            TokenType::Rpc => "RPC",
            TokenType::Log => "LOG",
            TokenType::Lis => "LIS",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FBC" => Ok(TokenType::Fbc),
            "RPC" => Ok(TokenType::Rpc),
            "LOG" => Ok(TokenType::Log),
            "LIS" => Ok(TokenType::Lis),
            other => Err(format!("unknown token type: {other}")),
        }
    }
}

/// A diagnostic item on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeToken {
    pub node_name: String,
    pub ip_address: String,
    pub token_id: String,
    pub token_type: TokenType,
}

impl NodeToken {
    /// Back-reference carried by commands generated for this token
    pub fn token_ref(&self) -> TokenRef {
        TokenRef {
            node_name: self.node_name.clone(),
            token_id: self.token_id.clone(),
            token_type: self.token_type,
        }
    }
}

/// A remote node and its tokens keyed by token id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub tokens: BTreeMap<String, NodeToken>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tokens: BTreeMap::new(),
        }
    }

    /// Insert a token, replacing any previous token with the same id
    pub fn add_token(&mut self, token: NodeToken) {
        self.tokens.insert(token.token_id.clone(), token);
    }

    /// Tokens of a given type
    pub fn tokens_of(&self, token_type: TokenType) -> impl Iterator<Item = &NodeToken> {
        self.tokens
            .values()
            .filter(move |t| t.token_type == token_type)
    }
}

/// Diagnostic back-reference from a command to the token it was generated for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenRef {
    pub node_name: String,
    pub token_id: String,
    pub token_type: TokenType,
}

impl TokenRef {
    pub fn new(node_name: impl Into<String>, token_id: impl Into<String>, token_type: TokenType) -> Self {
        Self {
            node_name: node_name.into(),
            token_id: token_id.into(),
            token_type,
        }
    }
}

impl fmt::Display for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.node_name, self.token_type, self.token_id)
    }
}
