//! Blockwise Core Library
//!
//! This crate provides the matching engines for the Blockwise content blocker:
//! a DNR-style request filter and a cosmetic (CSS selector) resolver.
//!
//! # Architecture
//!
//! Both engines answer point queries over an immutable snapshot. Loading
//! builds a complete new snapshot off to the side and publishes it with a
//! single atomic swap, so queries never observe a half-built state and
//! never take a lock.
//!
//! # Modules
//!
//! - `domain`: simplified base-domain extraction and suffix matching
//! - `url`: request URL parsing and the `^` separator test
//! - `pattern`: the `urlFilter` pattern language
//! - `matcher`: the request filter engine
//! - `cosmetic`: the cosmetic selector resolver
//! - `types`: rule model and request/decision types
//! - `error`: the error taxonomy shared with the loader

pub mod cosmetic;
pub mod domain;
pub mod error;
pub mod matcher;
pub mod pattern;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use cosmetic::{CosmeticResolver, CosmeticResult, CosmeticStats};
pub use domain::{base_domain, is_third_party};
pub use error::FilterError;
pub use matcher::{CompiledRuleSet, EngineStats, FilterEngine};
pub use pattern::{match_filter_pattern, UrlFilter};
pub use types::{
    DomainType, MatchDecision, MatchResult, Redirect, Request, ResourceType, Rule, RuleAction,
    RuleCondition, RuleId,
};
