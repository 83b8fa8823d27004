//! Command text generation for node tokens
//!
//! The queue only needs ready-to-send text tagged with its token. A generator
//! turns each token into that text; closures work as generators too.

use super::processor::BatchItem;
use node_console_shared::{Node, NodeToken, TokenType};
use std::collections::HashMap;

/// Produces the command text for one token of a node, or `None` to skip it
pub trait CommandGenerator: Send + Sync {
    fn generate(&self, node: &Node, token: &NodeToken) -> Option<String>;
}

impl<F> CommandGenerator for F
where
    F: Fn(&Node, &NodeToken) -> Option<String> + Send + Sync,
{
    fn generate(&self, node: &Node, token: &NodeToken) -> Option<String> {
        self(node, token)
    }
}

/// Per-type text templates; `{id}` is replaced by the token id and `{node}`
/// by the node name
#[derive(Debug, Clone)]
pub struct TemplateGenerator {
    templates: HashMap<TokenType, String>,
}

impl Default for TemplateGenerator {
    fn default() -> Self {
        Self::empty()
            .with_template(TokenType::Fbc, "read {id}")
            .with_template(TokenType::Rpc, "rpc {id}")
            .with_template(TokenType::Log, "log {id}")
            .with_template(TokenType::Lis, "lis {id}")
    }
}

impl TemplateGenerator {
    /// A generator that skips every token until templates are added
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn with_template(mut self, token_type: TokenType, template: impl Into<String>) -> Self {
        self.templates.insert(token_type, template.into());
        self
    }
}

impl CommandGenerator for TemplateGenerator {
    fn generate(&self, node: &Node, token: &NodeToken) -> Option<String> {
        self.templates.get(&token.token_type).map(|template| {
            template
                .replace("{id}", &token.token_id)
                .replace("{node}", &node.name)
        })
    }
}

/// Generate one batch item per token of `node`, in token-id order.
///
/// `types` restricts the batch to the listed token types; empty means all.
pub fn build_batch(node: &Node, types: &[TokenType], generator: &dyn CommandGenerator) -> Vec<BatchItem> {
    node.tokens
        .values()
        .filter(|token| types.is_empty() || types.contains(&token.token_type))
        .filter_map(|token| {
            generator.generate(node, token).map(|text| BatchItem {
                token_ref: token.token_ref(),
                text,
            })
        })
        .collect()
}
