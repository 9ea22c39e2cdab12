//! Remote repository URL grammar.
//!
//! Accepted forms: `git@host:org/repo.git[/path][?ref=R]`,
//! `https://host/org/repo[.git][/path][?ref=R]`,
//! `host/org/repo_git/path[?ref=R]`, plus the `git::` and `gh:` prefixes.
//! Azure DevOps and AWS CodeCommit hosts never take the `.git` suffix.

use crate::error::Error;
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

const GIT_SUFFIX: &str = ".git";
const GIT_DELIMITER: &str = "_git/";

static REF_QUERY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\?(version|ref)=").expect("query pattern is valid"));

/// A parsed remote spec: a repository, a ref, and a path therein.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSpec {
    /// The original spec, kept verbatim for cycle detection.
    pub raw: String,
    /// e.g. `https://github.com/`
    pub host: String,
    /// organization/repoName
    pub org_repo: String,
    /// Relative path in the repository to a kustomization.
    pub path: String,
    /// Branch, tag, or commit reference.
    pub git_ref: String,
    /// `.git`, or empty when the `_git/` delimiter form is used.
    pub git_suffix: String,
}

impl RepoSpec {
    /// Parse a remote spec; fails on anything that does not look like a
    /// repository URL.
    pub fn from_url(raw: &str) -> Result<RepoSpec> {
        if Path::new(raw).is_absolute() {
            return Err(Error::MalformedInput(format!("uri looks like abs path: {raw}")).into());
        }
        let (host, org_repo, path, git_ref, git_suffix) = parse_git_url(raw);
        if org_repo.is_empty() {
            return Err(Error::MalformedInput(format!("url lacks orgRepo: {raw}")).into());
        }
        if host.is_empty() {
            return Err(Error::MalformedInput(format!("url lacks host: {raw}")).into());
        }
        Ok(RepoSpec {
            raw: raw.to_string(),
            host,
            org_repo,
            path,
            git_ref,
            git_suffix,
        })
    }

    /// The string handed to `git`: Azure and AWS hosts take no suffix.
    pub fn clone_spec(&self) -> String {
        if is_azure_host(&self.host) || is_aws_host(&self.host) {
            return format!("{}{}", self.host, self.org_repo);
        }
        format!("{}{}{}", self.host, self.org_repo, self.git_suffix)
    }
}

fn parse_git_url(n: &str) -> (String, String, String, String, String) {
    if let Some(index) = n.find(GIT_DELIMITER) {
        let after = &n[index + GIT_DELIMITER.len()..];
        let host = normalize_git_host_spec(&n[..index + GIT_DELIMITER.len()]);
        let org_repo = after
            .split('/')
            .next()
            .unwrap_or("")
            .split('?')
            .next()
            .unwrap_or("")
            .to_string();
        let (path, git_ref) = peel_query(&after[org_repo.len()..]);
        return (host, org_repo, path, git_ref, String::new());
    }
    let (host, rest) = parse_host_spec(n);
    let git_suffix = GIT_SUFFIX.to_string();
    if let Some(index) = rest.find(GIT_SUFFIX) {
        let org_repo = rest[..index].to_string();
        let (path, git_ref) = peel_query(&rest[index + GIT_SUFFIX.len()..]);
        return (host, org_repo, path, git_ref, git_suffix);
    }

    let Some(i) = rest.find('/').filter(|i| *i >= 1) else {
        return (String::new(), String::new(), String::new(), String::new(), String::new());
    };
    match rest[i + 1..].find('/') {
        Some(j) => {
            let j = j + i + 1;
            let org_repo = rest[..j].to_string();
            let (path, git_ref) = peel_query(&rest[j + 1..]);
            (host, org_repo, path, git_ref, git_suffix)
        }
        None => {
            let (org_repo, git_ref) = peel_query(&rest);
            (host, org_repo, String::new(), git_ref, git_suffix)
        }
    }
}

fn peel_query(arg: &str) -> (String, String) {
    match REF_QUERY.find(arg) {
        Some(m) => (arg[..m.start()].to_string(), arg[m.end()..].to_string()),
        None => (arg.to_string(), String::new()),
    }
}

fn parse_host_spec(n: &str) -> (String, String) {
    let mut n = n;
    let mut host = String::new();
    // Order matters here.
    for p in [
        "git::",
        "gh:",
        "ssh://",
        "https://",
        "http://",
        "git@",
        "github.com:",
        "github.com/",
    ] {
        if p.len() < n.len() && n[..p.len()].eq_ignore_ascii_case(p) {
            n = &n[p.len()..];
            host.push_str(p);
        }
    }
    if host == "git@" {
        if let Some(i) = n.find('/').or_else(|| n.find(':')) {
            host.push_str(&n[..=i]);
            n = &n[i + 1..];
        }
        return (host, n.to_string());
    }

    // If host is a http(s) or ssh URL, grab the domain part.
    for p in ["ssh://", "https://", "http://"] {
        if host.ends_with(p) {
            if let Some(i) = n.find('/') {
                host.push_str(&n[..=i]);
                n = &n[i + 1..];
            }
            break;
        }
    }

    (normalize_git_host_spec(&host), n.to_string())
}

fn normalize_git_host_spec(host: &str) -> String {
    let s = host.to_ascii_lowercase();
    let mut host = host.to_string();
    if s.contains("github.com") {
        if s.contains("git@") || s.contains("ssh:") {
            host = "git@github.com:".to_string();
        } else {
            host = "https://github.com/".to_string();
        }
    }
    if s.starts_with("git::") {
        host = s["git::".len()..].to_string();
    }
    host
}

fn is_azure_host(host: &str) -> bool {
    host.contains("dev.azure.com") || host.contains("visualstudio.com")
}

fn is_aws_host(host: &str) -> bool {
    host.contains("amazonaws.com")
}
