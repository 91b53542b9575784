//! # single-diffcorr
//!
//! Differential correlation network analysis for expression data, part of the single-rust ecosystem.
//!
//! Given a molecules × samples matrix and two sample cohorts, this crate finds molecule pairs whose
//! correlation changes between cohorts, molecules whose aggregate correlation profile shifts, and
//! molecules over-represented among the changing edges. Exhaustive runs address the
//! `n(n-1)/2` pairs through a triangular index and never materialize the pair list.
//!
//! ## Core Features
//!
//! - **Correlation**: Pearson, Spearman and a rank-transform Spearman mode, computed in parallel chunks
//! - **Differential Z-Test**: Fisher-z comparison of cohort correlations with optional label permutation
//! - **Molecule Scores**: Mean or median aggregate statistics with permutation p-values
//! - **Enrichment**: Hypergeometric over-representation among significant edges
//! - **Reports**: Sorted CSV output written in bounded batches
//!
//! ## Quick Start
//!
//! Build a [`pipeline::DiffCorrAnalysis`] from an [`matrix::ExpressionMatrix`], a
//! [`matrix::SampleGrouping`] and a [`config::RunConfig`], or call the `MatrixDiffCorrTests`
//! trait on the matrix directly.
//!
//! ## Module Organization
//!
//! - **[`pairs`]**: Triangular pair codec, pair spaces and the worker pool
//! - **[`correlation`]**: Per-cohort correlation engine
//! - **[`testing`]**: Differential tests, permutation and multiple testing correction
//! - **[`enrichment`]**: Hypergeometric enrichment of differential edges
//! - **[`report`]**: Chunked CSV report writer

pub mod config;
pub mod correlation;
pub mod enrichment;
pub mod matrix;
pub mod pairs;
pub mod pipeline;
pub mod report;
pub mod testing;
