use std::path::Path;

use git2::{
    build::RepoBuilder, BranchType, Cred, FetchOptions, IndexAddOption, PushOptions,
    RemoteCallbacks, Repository, Signature,
};

use crate::error::{AppError, Result};

/// Validate a branch name to prevent argument injection.
/// Rejects names starting with `-` and names git itself would refuse.
fn validate_branch_name(name: &str) -> Result<()> {
    if name.starts_with('-') {
        return Err(AppError::Git(format!(
            "Invalid branch name (starts with '-'): {name}"
        )));
    }
    if !git2::Branch::name_is_valid(name)? {
        return Err(AppError::Git(format!("Invalid branch name: {name}")));
    }
    Ok(())
}

/// Build `FetchOptions` that authenticate via credential callback.
/// The token is captured by the closure and never written to disk.
fn make_fetch_options(token: &str) -> FetchOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
        Cred::userpass_plaintext("x-access-token", token)
    });
    let mut opts = FetchOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

fn make_push_options(token: &str) -> PushOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
        Cred::userpass_plaintext("x-access-token", token)
    });
    let mut opts = PushOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

/// Clone a repository into the target directory.
///
/// The remote URL stored in `.git/config` will be the **plain** URL
/// (no credentials). Authentication is handled via credential callback only.
/// All remote branches land under `refs/remotes/origin/*`.
pub async fn clone(url: &str, target: &Path, token: &str) -> Result<()> {
    if !url.starts_with("https://") {
        return Err(AppError::Git(format!(
            "Expected HTTPS clone URL, got: {url}"
        )));
    }

    let url = url.to_string();
    let target = target.to_path_buf();
    let token = token.to_string();

    tokio::task::spawn_blocking(move || {
        let fetch_opts = make_fetch_options(&token);
        RepoBuilder::new()
            .fetch_options(fetch_opts)
            .clone(&url, &target)?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Clone task panicked: {e}")))?
}

/// Write the bot identity into the repository's local config.
pub async fn configure_identity(dir: &Path, name: &str, email: &str) -> Result<()> {
    let dir = dir.to_path_buf();
    let name = name.to_string();
    let email = email.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut config = repo.config()?;
        config.set_str("user.name", &name)?;
        config.set_str("user.email", &email)?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Configure-identity task panicked: {e}")))?
}

/// Whether `origin/<branch>` is known locally. Relies on the refs fetched by `clone`.
pub async fn remote_branch_exists(dir: &Path, branch_name: &str) -> Result<bool> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let exists = repo
            .find_branch(&format!("origin/{branch_name}"), BranchType::Remote)
            .is_ok();
        Ok(exists)
    })
    .await
    .map_err(|e| AppError::Git(format!("Branch-lookup task panicked: {e}")))?
}

/// Create a local branch from `origin/<branch>` and check it out.
pub async fn checkout_remote_branch(dir: &Path, branch_name: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;

        let remote_ref = format!("refs/remotes/origin/{branch_name}");
        let commit = repo.find_reference(&remote_ref)?.peel_to_commit()?;

        repo.branch(&branch_name, &commit, true)?;

        let obj = repo.revparse_single(&format!("refs/heads/{branch_name}"))?;
        repo.checkout_tree(&obj, None)?;
        repo.set_head(&format!("refs/heads/{branch_name}"))?;

        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Checkout task panicked: {e}")))?
}

/// Create and checkout a new branch from the current HEAD.
pub async fn create_branch(dir: &Path, branch_name: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let head = repo.head()?;
        let commit = head.peel_to_commit()?;
        repo.branch(&branch_name, &commit, false)?;
        let obj = repo.revparse_single(&format!("refs/heads/{branch_name}"))?;
        repo.checkout_tree(&obj, None)?;
        repo.set_head(&format!("refs/heads/{branch_name}"))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Create-branch task panicked: {e}")))?
}

/// One line per commit reachable from HEAD, newest first: `<short id> <summary>`.
pub async fn commit_log(dir: &Path, limit: usize) -> Result<Vec<String>> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        if repo.head().is_err() {
            return Ok(Vec::new());
        }

        let mut walk = repo.revwalk()?;
        walk.push_head()?;

        let mut lines = Vec::new();
        for oid in walk.take(limit) {
            let commit = repo.find_commit(oid?)?;
            let short = commit.as_object().short_id()?;
            lines.push(format!(
                "{} {}",
                short.as_str().unwrap_or_default(),
                commit.summary().unwrap_or_default()
            ));
        }
        Ok(lines)
    })
    .await
    .map_err(|e| AppError::Git(format!("Log task panicked: {e}")))?
}

/// Stage everything (including deletions) and commit, even when nothing changed.
/// Returns the new commit id.
pub async fn commit_all(dir: &Path, message: &str, name: &str, email: &str) -> Result<String> {
    let dir = dir.to_path_buf();
    let message = message.to_string();
    let name = name.to_string();
    let email = email.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;

        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        let sig = Signature::now(&name, &email)?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        let parents: Vec<_> = parent.iter().collect();

        let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &parents)?;
        Ok(oid.to_string())
    })
    .await
    .map_err(|e| AppError::Git(format!("Commit task panicked: {e}")))?
}

/// Push with force so a re-run overwrites the branch left by a previous attempt.
pub async fn force_push(dir: &Path, branch_name: &str, token: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();
    let token = token.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("+refs/heads/{branch_name}:refs/heads/{branch_name}");
        let mut push_opts = make_push_options(&token);
        remote.push(&[&refspec], Some(&mut push_opts))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Force-push task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn init_with_commit(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        fs::write(dir.join("README.md"), "hello").unwrap();
        {
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("README.md")).unwrap();
            index.write().unwrap();
            let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
            let sig = Signature::now("t", "t@example.com").unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
                .unwrap();
        }
        repo
    }

    #[test]
    fn test_validate_branch_name_rejects_dash_prefix() {
        assert!(validate_branch_name("-evil").is_err());
        assert!(validate_branch_name("--upload-pack").is_err());
    }

    #[test]
    fn test_validate_branch_name_accepts_ticket_keys() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("DP-123").is_ok());
        assert!(validate_branch_name("feature/DP-9").is_ok());
        assert!(validate_branch_name("bad..name").is_err());
    }

    #[tokio::test]
    async fn test_clone_rejects_non_https() {
        let result = clone(
            "git@github.com:owner/repo.git",
            Path::new("/tmp/test"),
            "token",
        )
        .await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Expected HTTPS clone URL"));
    }

    #[tokio::test]
    async fn test_commit_all_allows_empty_commits() {
        let tmp = tempfile::tempdir().unwrap();
        init_with_commit(tmp.path());

        commit_all(tmp.path(), "feat(DP-1): nothing", "Bot", "bot@example.com")
            .await
            .unwrap();

        let log = commit_log(tmp.path(), 10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].ends_with("feat(DP-1): nothing"));
        assert!(log[1].ends_with("initial"));
    }

    #[tokio::test]
    async fn test_commit_all_stages_new_files() {
        let tmp = tempfile::tempdir().unwrap();
        init_with_commit(tmp.path());
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/App.jsx"), "export default 1;").unwrap();

        commit_all(tmp.path(), "add app", "Bot", "bot@example.com")
            .await
            .unwrap();

        let repo = Repository::open(tmp.path()).unwrap();
        assert!(repo.statuses(None).unwrap().is_empty());
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.author().name(), Some("Bot"));
        assert!(head.tree().unwrap().get_path(Path::new("src/App.jsx")).is_ok());
    }

    #[tokio::test]
    async fn test_commit_log_respects_limit_and_empty_repo() {
        let tmp = tempfile::tempdir().unwrap();
        Repository::init(tmp.path()).unwrap();
        assert!(commit_log(tmp.path(), 10).await.unwrap().is_empty());

        for i in 0..3 {
            commit_all(tmp.path(), &format!("c{i}"), "Bot", "b@example.com")
                .await
                .unwrap();
        }
        let log = commit_log(tmp.path(), 2).await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].ends_with("c2"));
    }

    #[tokio::test]
    async fn test_create_branch_and_remote_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        init_with_commit(tmp.path());

        create_branch(tmp.path(), "DP-7").await.unwrap();
        let repo = Repository::open(tmp.path()).unwrap();
        assert_eq!(repo.head().unwrap().shorthand(), Some("DP-7"));

        assert!(!remote_branch_exists(tmp.path(), "DP-7").await.unwrap());

        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.reference("refs/remotes/origin/DP-8", head.id(), true, "test")
            .unwrap();
        assert!(remote_branch_exists(tmp.path(), "DP-8").await.unwrap());

        checkout_remote_branch(tmp.path(), "DP-8").await.unwrap();
        let repo = Repository::open(tmp.path()).unwrap();
        assert_eq!(repo.head().unwrap().shorthand(), Some("DP-8"));
    }

    #[tokio::test]
    async fn test_configure_identity() {
        let tmp = tempfile::tempdir().unwrap();
        Repository::init(tmp.path()).unwrap();

        configure_identity(tmp.path(), "Devflow Bot", "bot@example.com")
            .await
            .unwrap();

        let repo = Repository::open(tmp.path()).unwrap();
        let snapshot = repo.config().unwrap().snapshot().unwrap();
        assert_eq!(snapshot.get_str("user.name").unwrap(), "Devflow Bot");
    }
}
