//! Commit history traversal: merge bases, commit-ish resolution and logs.

use std::collections::{HashSet, VecDeque};

use super::repo::{Repo, RepoError, Result, branch_ref_name};
use crate::repository::{Commit, ObjectId};

impl Repo {
    /// Every commit reachable from `start`, including `start`, breadth-first.
    async fn ancestors(&self, start: &ObjectId) -> Result<Vec<ObjectId>> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let commit = self.read_commit(&id).await?;
            order.push(id);
            queue.extend(commit.parents);
        }
        Ok(order)
    }

    /// The nearest common ancestor of two commits, if they share history.
    ///
    /// Walks `b` breadth-first and returns the first commit that is also an
    /// ancestor of `a`.
    pub async fn merge_base(&self, a: &ObjectId, b: &ObjectId) -> Result<Option<ObjectId>> {
        let a_ancestors: HashSet<ObjectId> = self.ancestors(a).await?.into_iter().collect();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([b.clone()]);
        while let Some(id) = queue.pop_front() {
            if a_ancestors.contains(&id) {
                return Ok(Some(id));
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            queue.extend(self.read_commit(&id).await?.parents);
        }
        Ok(None)
    }

    /// Returns true if `ancestor` is reachable from `descendant`.
    pub async fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> Result<bool> {
        Ok(self.ancestors(descendant).await?.contains(ancestor))
    }

    /// Resolve `HEAD`, a branch name or a full commit ID, with optional
    /// `^` (first parent) and `~N` (N-th first-parent ancestor) suffixes.
    pub async fn resolve_commitish(&self, spec: &str) -> Result<ObjectId> {
        let bad = || RepoError::BadCommitish(spec.to_string());

        let base_end = spec.find(['^', '~']).unwrap_or(spec.len());
        let (base, mut suffix) = spec.split_at(base_end);

        let mut id = if base == "HEAD" {
            self.head_commit().await?.ok_or_else(bad)?
        } else if let Some(commit) = self.read_ref(&branch_ref_name(base)).await.ok().flatten() {
            commit
        } else if base.len() == 64 && base.chars().all(|c| c.is_ascii_hexdigit()) {
            base.to_lowercase()
        } else {
            return Err(bad());
        };
        self.read_commit(&id).await.map_err(|_| bad())?;

        while !suffix.is_empty() {
            let steps = if let Some(rest) = suffix.strip_prefix('^') {
                suffix = rest;
                1
            } else if let Some(rest) = suffix.strip_prefix('~') {
                let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
                let count = if digits == 0 {
                    1
                } else {
                    rest[..digits].parse::<usize>().map_err(|_| bad())?
                };
                suffix = &rest[digits..];
                count
            } else {
                return Err(bad());
            };
            for _ in 0..steps {
                let commit = self.read_commit(&id).await?;
                id = commit.parents.first().cloned().ok_or_else(bad)?;
            }
        }
        Ok(id)
    }

    /// First-parent history starting at `start`, newest first.
    pub async fn log(&self, start: &ObjectId, limit: Option<usize>) -> Result<Vec<(ObjectId, Commit)>> {
        let mut entries = Vec::new();
        let mut next = Some(start.clone());
        while let Some(id) = next {
            if limit.is_some_and(|max| entries.len() >= max) {
                break;
            }
            let commit = self.read_commit(&id).await?;
            next = commit.parents.first().cloned();
            entries.push((id, commit));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::MemoryBackend;
    use crate::caches::NoopCache;
    use crate::repo::{Repo, RepoError, RepoInitialize};
    use crate::repository::{ObjectId, Tree};

    async fn commit_on(repo: &Repo, parents: Vec<ObjectId>, msg: &str) -> ObjectId {
        let tree = repo.write_tree(Tree::empty()).await.unwrap();
        repo.create_commit(&tree, parents, msg, None).await.unwrap()
    }

    #[tokio::test]
    async fn test_merge_base_of_diverged_branches() {
        let repo = Repo::new(MemoryBackend::new(), NoopCache);
        let root = repo.initialize(RepoInitialize::default()).await.unwrap();
        let base = commit_on(&repo, vec![root.clone()], "base").await;
        let ours = commit_on(&repo, vec![base.clone()], "ours").await;
        let theirs1 = commit_on(&repo, vec![base.clone()], "theirs1").await;
        let theirs2 = commit_on(&repo, vec![theirs1.clone()], "theirs2").await;

        assert_eq!(repo.merge_base(&ours, &theirs2).await.unwrap(), Some(base.clone()));
        assert_eq!(repo.merge_base(&base, &theirs2).await.unwrap(), Some(base.clone()));
        assert!(repo.is_ancestor(&base, &theirs2).await.unwrap());
        assert!(!repo.is_ancestor(&ours, &theirs2).await.unwrap());
    }

    #[tokio::test]
    async fn test_merge_base_unrelated() {
        let repo = Repo::new(MemoryBackend::new(), NoopCache);
        let a = commit_on(&repo, vec![], "a").await;
        let b = commit_on(&repo, vec![], "b").await;
        assert_eq!(repo.merge_base(&a, &b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_resolve_commitish() {
        let repo = Repo::new(MemoryBackend::new(), NoopCache);
        let root = repo.initialize(RepoInitialize::default()).await.unwrap();
        let c1 = commit_on(&repo, vec![root.clone()], "c1").await;
        let c2 = commit_on(&repo, vec![c1.clone()], "c2").await;
        repo.update_head(Some(&root), &c2).await.unwrap();

        assert_eq!(repo.resolve_commitish("HEAD").await.unwrap(), c2);
        assert_eq!(repo.resolve_commitish("main").await.unwrap(), c2);
        assert_eq!(repo.resolve_commitish("HEAD^").await.unwrap(), c1);
        assert_eq!(repo.resolve_commitish("HEAD~2").await.unwrap(), root);
        assert_eq!(repo.resolve_commitish("main^^").await.unwrap(), root);
        assert_eq!(repo.resolve_commitish(&c1).await.unwrap(), c1);

        assert!(matches!(
            repo.resolve_commitish("HEAD~3").await,
            Err(RepoError::BadCommitish(_))
        ));
        assert!(matches!(
            repo.resolve_commitish("nosuchbranch").await,
            Err(RepoError::BadCommitish(_))
        ));
    }

    #[tokio::test]
    async fn test_log_first_parent() {
        let repo = Repo::new(MemoryBackend::new(), NoopCache);
        let root = repo.initialize(RepoInitialize::default()).await.unwrap();
        let c1 = commit_on(&repo, vec![root.clone()], "c1").await;

        let log = repo.log(&c1, None).await.unwrap();
        let messages: Vec<&str> = log.iter().map(|(_, c)| c.message()).collect();
        assert_eq!(messages, vec!["c1", "Repo initialization"]);
        assert_eq!(repo.log(&c1, Some(1)).await.unwrap().len(), 1);
    }
}
