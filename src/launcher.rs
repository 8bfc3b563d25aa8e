//! Session discovery and per-account task spawning.

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use url::Url;

use crate::api::{ClientRegistry, Connector, HttpConnector};
use crate::auth::StoredLaunchProvider;
use crate::auth::stored::SESSION_FILE_EXTENSION;
use crate::config::Settings;
use crate::error::ConfigError;
use crate::runner::{Account, run_account};

/// Session names found in `dir`, sorted. A missing directory yields none.
pub fn discover_sessions(dir: &Path) -> Result<Vec<String>, ConfigError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut sessions = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SESSION_FILE_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            sessions.push(stem.to_string());
        }
    }
    sessions.sort();
    Ok(sessions)
}

/// Proxy URLs from `path`, one per line. Blank lines and `#` comments are
/// skipped; a missing file yields none.
pub fn load_proxies(path: &Path) -> Result<Vec<String>, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            Url::parse(line)
                .map(|_| line.to_string())
                .map_err(|e| ConfigError::InvalidValue {
                    key: format!("proxy {line:?}"),
                    message: e.to_string(),
                })
        })
        .collect()
}

/// Pair sessions with proxies round-robin.
pub fn assign_proxies(sessions: Vec<String>, proxies: &[String]) -> Vec<(String, Option<String>)> {
    sessions
        .into_iter()
        .enumerate()
        .map(|(i, session)| {
            let proxy = (!proxies.is_empty()).then(|| proxies[i % proxies.len()].clone());
            (session, proxy)
        })
        .collect()
}

/// Spawn one run loop per discovered session.
pub fn spawn_accounts(
    settings: Arc<Settings>,
    registry: Arc<ClientRegistry>,
) -> Result<JoinSet<()>, ConfigError> {
    let sessions = discover_sessions(&settings.sessions_dir)?;
    let proxies = if settings.use_proxy {
        load_proxies(&settings.proxies_file)?
    } else {
        Vec::new()
    };

    let connector: Arc<dyn Connector> = Arc::new(HttpConnector::new(
        settings.api_base_url.clone(),
        settings.user_agent.clone(),
        registry,
    ));

    let mut set = JoinSet::new();
    for (session, proxy) in assign_proxies(sessions, &proxies) {
        let provider = StoredLaunchProvider::for_session(&settings.sessions_dir, &session);
        let account = Account::new(
            session,
            proxy,
            provider,
            Arc::clone(&connector),
            Arc::clone(&settings),
        );
        set.spawn(run_account(account));
    }

    tracing::info!(accounts = set.len(), "Accounts started");
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_url_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bob.url"), "x").unwrap();
        std::fs::write(dir.path().join("alice.url"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(discover_sessions(dir.path()).unwrap(), vec!["alice", "bob"]);
    }

    #[test]
    fn missing_sessions_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_sessions(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn proxies_skip_comments_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        std::fs::write(&path, "# pool\nsocks5://u:p@1.2.3.4:1080\n\nhttp://5.6.7.8:3128\n").unwrap();
        assert_eq!(
            load_proxies(&path).unwrap(),
            vec!["socks5://u:p@1.2.3.4:1080", "http://5.6.7.8:3128"]
        );

        std::fs::write(&path, "definitely not a url\n").unwrap();
        assert!(load_proxies(&path).is_err());
    }

    #[test]
    fn proxies_cycle_over_sessions() {
        let sessions = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let proxies = vec!["http://p1:1".to_string(), "http://p2:2".to_string()];
        let pairs = assign_proxies(sessions, &proxies);
        assert_eq!(pairs[0].1.as_deref(), Some("http://p1:1"));
        assert_eq!(pairs[1].1.as_deref(), Some("http://p2:2"));
        assert_eq!(pairs[2].1.as_deref(), Some("http://p1:1"));
    }

    #[test]
    fn no_proxies_means_direct() {
        let pairs = assign_proxies(vec!["a".into()], &[]);
        assert_eq!(pairs, vec![("a".to_string(), None)]);
    }
}
