//! Build graph state.
//!
//! A [`GraphState`] is an immutable value describing "the build so far".
//! Every operation takes `&self` and returns a new state; filesystem
//! operations are linked to their parent through `Arc`, so earlier states
//! stay valid and share their history with later ones.
//!
//! [`GraphState::marshal`] flattens the chain into a [`Definition`] with a
//! content digest per operation, chained through the parent digest so that
//! any change invalidates everything downstream of it.

use crate::error::{KilnError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Name of the local source the backend exposes the build context under.
pub const CONTEXT_SOURCE: &str = "context";

/// Target platform of the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self { os: os.into(), architecture: architecture.into() }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

/// Sharing mode of a persistent cache directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSharing {
    Shared,
    Private,
    Locked,
}

/// A named cache directory mounted into a run step, persisted across builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMount {
    pub target: String,
    pub id: String,
    pub sharing: CacheSharing,
}

impl CacheMount {
    pub fn shared(target: &str, id: &str) -> Self {
        Self { target: target.to_string(), id: id.to_string(), sharing: CacheSharing::Shared }
    }
}

/// A command executed inside the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub args: Vec<String>,
    /// `KEY=value` pairs visible to the command.
    pub env: Vec<String>,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<CacheMount>,
}

/// A copy from a named local source into the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySpec {
    pub source: String,
    /// Path relative to the local source root.
    pub src: String,
    pub dest: String,
}

/// A single filesystem operation in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Op {
    Image { reference: String, platform: Platform },
    Exec(RunSpec),
    Copy(CopySpec),
}

#[derive(Debug)]
struct OpNode {
    op: Op,
    parent: Option<Arc<OpNode>>,
}

/// Immutable build state. Cloning is cheap for the op chain.
#[derive(Debug, Clone)]
pub struct GraphState {
    head: Arc<OpNode>,
    platform: Platform,
    /// Ordered; a later write to the same key replaces the earlier one.
    env: Vec<(String, String)>,
    dir: String,
    user: Option<String>,
}

impl GraphState {
    /// Seed a state from a base image.
    pub fn image(reference: impl Into<String>, platform: Platform) -> Self {
        let op = Op::Image { reference: reference.into(), platform: platform.clone() };
        Self {
            head: Arc::new(OpNode { op, parent: None }),
            platform,
            env: Vec::new(),
            dir: "/".to_string(),
            user: None,
        }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn working_dir(&self) -> &str {
        &self.dir
    }

    pub fn current_user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Number of filesystem operations in the chain, including the image source.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut node = Some(&self.head);
        while let Some(current) = node {
            depth += 1;
            node = current.parent.as_ref();
        }
        depth
    }

    pub fn add_env(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        let mut next = self.clone();
        match next.env.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => next.env.push((key, value)),
        }
        next
    }

    pub fn dir(&self, dir: impl Into<String>) -> Self {
        Self { dir: dir.into(), ..self.clone() }
    }

    pub fn user(&self, user: impl Into<String>) -> Self {
        Self { user: Some(user.into()), ..self.clone() }
    }

    /// Run a shell command with the current env, working dir and user.
    pub fn run_shell(&self, command: impl Into<String>, mounts: Vec<CacheMount>) -> Self {
        let spec = RunSpec {
            args: vec!["/bin/sh".to_string(), "-c".to_string(), command.into()],
            env: self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect(),
            cwd: self.dir.clone(),
            user: self.user.clone(),
            mounts,
        };
        self.push(Op::Exec(spec))
    }

    /// Copy `src` (relative to the build context) to `dest` in the image.
    pub fn copy_from_context(&self, src: impl Into<String>, dest: impl Into<String>) -> Self {
        self.push(Op::Copy(CopySpec {
            source: CONTEXT_SOURCE.to_string(),
            src: src.into(),
            dest: dest.into(),
        }))
    }

    fn push(&self, op: Op) -> Self {
        Self { head: Arc::new(OpNode { op, parent: Some(self.head.clone()) }), ..self.clone() }
    }

    /// Flatten the state into a serializable definition, oldest op first.
    pub fn marshal(&self) -> Result<Definition> {
        let mut chain = Vec::new();
        let mut node = Some(&self.head);
        while let Some(current) = node {
            chain.push(&current.op);
            node = current.parent.as_ref();
        }
        chain.reverse();

        let mut ops = Vec::with_capacity(chain.len());
        let mut parent_digest: Option<String> = None;
        for op in chain {
            let digest = op_digest(op, parent_digest.as_deref())?;
            ops.push(DefinitionOp { digest: digest.clone(), op: op.clone() });
            parent_digest = Some(digest);
        }

        Ok(Definition {
            platform: self.platform.clone(),
            env: self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect(),
            working_dir: self.dir.clone(),
            user: self.user.clone(),
            ops,
        })
    }
}

fn op_digest(op: &Op, parent: Option<&str>) -> Result<String> {
    let mut hasher = Sha256::new();

    if let Some(parent) = parent {
        hasher.update(parent.as_bytes());
    }

    let encoded = serde_json::to_vec(op)
        .map_err(|e| KilnError::Serialization { reason: format!("build op: {}", e) })?;
    hasher.update(&encoded);

    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// A marshalled operation and its chained digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionOp {
    pub digest: String,
    pub op: Op,
}

/// Serialized build graph handed to the build backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub platform: Platform,
    pub env: Vec<String>,
    pub working_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub ops: Vec<DefinitionOp>,
}

impl Definition {
    /// Digest of the final operation.
    pub fn head_digest(&self) -> Option<&str> {
        self.ops.last().map(|op| op.digest.as_str())
    }

    /// Exec operations in order.
    pub fn runs(&self) -> impl Iterator<Item = &RunSpec> {
        self.ops.iter().filter_map(|op| match &op.op {
            Op::Exec(run) => Some(run),
            _ => None,
        })
    }

    /// Copy operations in order.
    pub fn copies(&self) -> impl Iterator<Item = &CopySpec> {
        self.ops.iter().filter_map(|op| match &op.op {
            Op::Copy(copy) => Some(copy),
            _ => None,
        })
    }
}
