//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use doifetch_core::{BackendKind, DEFAULT_PROXY};

/// Resolve a DOI to a downloadable PDF.
///
/// Doifetch follows the identifier's redirect chain to its landing page,
/// renders the page in a real browser (optionally behind a SOCKS5 proxy or
/// a supervised SSH tunnel), scrapes it for PDF links, and downloads the
/// chosen link with the page's own session credentials.
#[derive(Parser, Debug)]
#[command(name = "doifetch")]
#[command(author, version, about)]
pub struct Args {
    /// Document identifier to resolve (e.g. 10.48550/arXiv.2302.13971)
    pub doi: String,

    /// Proxy server to use. Accepts ssh://user@host for a supervised
    /// `ssh -NTD 1234 user@host` tunnel.
    #[arg(short, long, default_value = DEFAULT_PROXY)]
    pub proxy: String,

    /// Output file name. Defaults to the slugified DOI with a .pdf suffix.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Automation backend to drive the browser with
    #[arg(short, long, default_value = "cdp")]
    pub backend: BackendKind,

    /// Which discovered candidate to download when a page has several
    /// (ordinals as printed by the discovery listing)
    #[arg(short, long)]
    pub index: Option<usize>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
