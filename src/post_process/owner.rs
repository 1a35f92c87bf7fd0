//! 文件属主更新：按用户名/组名解析 uid/gid，解析不到的保持不变。

use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::base_system::book_paths::DownloadTarget;
use crate::base_system::context::OwnerConfig;
use crate::base_system::error::{DownloadError, DownloadResult};

/// `None` 即“不修改”。
pub trait OwnershipSetter {
    fn set_owner(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ChownOwnership;

impl OwnershipSetter for ChownOwnership {
    #[cfg(unix)]
    fn set_owner(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        std::os::unix::fs::chown(path, uid, gid)
    }

    #[cfg(not(unix))]
    fn set_owner(&self, path: &Path, _uid: Option<u32>, _gid: Option<u32>) -> io::Result<()> {
        warn!("当前平台不支持修改属主，跳过: {}", path.display());
        Ok(())
    }
}

#[cfg(unix)]
pub fn resolve_user(name: &str) -> Option<u32> {
    if name.is_empty() {
        return None;
    }
    match nix::unistd::User::from_name(name) {
        Ok(Some(user)) => Some(user.uid.as_raw()),
        Ok(None) => {
            warn!("未知用户 {name}，属主保持不变");
            None
        }
        Err(err) => {
            warn!("查询用户 {name} 失败: {err}");
            None
        }
    }
}

#[cfg(unix)]
pub fn resolve_group(name: &str) -> Option<u32> {
    if name.is_empty() {
        return None;
    }
    match nix::unistd::Group::from_name(name) {
        Ok(Some(group)) => Some(group.gid.as_raw()),
        Ok(None) => {
            warn!("未知用户组 {name}，属组保持不变");
            None
        }
        Err(err) => {
            warn!("查询用户组 {name} 失败: {err}");
            None
        }
    }
}

#[cfg(not(unix))]
pub fn resolve_user(_name: &str) -> Option<u32> {
    None
}

#[cfg(not(unix))]
pub fn resolve_group(_name: &str) -> Option<u32> {
    None
}

/// 依次处理作者目录、书名目录、每个分段以及（存在时的）封面。
pub fn apply_owner(
    setter: &dyn OwnershipSetter,
    owner: &OwnerConfig,
    target: &DownloadTarget,
) -> DownloadResult<()> {
    let uid = owner.user.as_deref().and_then(resolve_user);
    let gid = owner.group.as_deref().and_then(resolve_group);
    debug!(?uid, ?gid, "设置属主");

    let mut paths: Vec<&Path> = Vec::with_capacity(target.part_paths.len() + 3);
    paths.extend(target.author_dir());
    paths.push(&target.directory);
    paths.extend(target.part_paths.iter().map(|p| p.as_path()));
    if target.cover_path.is_file() {
        paths.push(&target.cover_path);
    }

    for path in paths {
        setter
            .set_owner(path, uid, gid)
            .map_err(|e| DownloadError::fs(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::fs;
    use std::path::PathBuf;

    use super::*;

    #[derive(Default)]
    pub(crate) struct RecordingOwner {
        pub(crate) calls: RefCell<Vec<(PathBuf, Option<u32>, Option<u32>)>>,
    }

    impl OwnershipSetter for RecordingOwner {
        fn set_owner(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
            self.calls.borrow_mut().push((path.to_path_buf(), uid, gid));
            Ok(())
        }
    }

    fn target_in(root: &Path, parts: &[u32]) -> DownloadTarget {
        let directory = root.join("jane doe").join("a tale");
        DownloadTarget {
            part_paths: parts
                .iter()
                .map(|n| crate::base_system::book_paths::part_path(&directory, *n))
                .collect(),
            cover_path: directory.join("a tale.jpg"),
            directory,
        }
    }

    #[test]
    fn unknown_names_leave_owner_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let target = target_in(dir.path(), &[1, 2]);
        let owner = OwnerConfig {
            user: Some("no-such-user-overdrive-dl".to_string()),
            group: Some(String::new()),
        };
        let rec = RecordingOwner::default();
        apply_owner(&rec, &owner, &target).unwrap();

        let calls = rec.calls.borrow();
        assert!(calls.iter().all(|(_, uid, gid)| uid.is_none() && gid.is_none()));
    }

    #[test]
    fn touches_dirs_parts_and_existing_cover() {
        let dir = tempfile::tempdir().unwrap();
        let target = target_in(dir.path(), &[1, 3]);
        let rec = RecordingOwner::default();

        apply_owner(&rec, &OwnerConfig::default(), &target).unwrap();
        let paths: Vec<PathBuf> = rec.calls.borrow().iter().map(|c| c.0.clone()).collect();
        assert_eq!(
            paths,
            vec![
                dir.path().join("jane doe"),
                target.directory.clone(),
                target.directory.join("part01.mp3"),
                target.directory.join("part03.mp3"),
            ]
        );

        fs::create_dir_all(&target.directory).unwrap();
        fs::write(&target.cover_path, b"jpg").unwrap();
        let rec = RecordingOwner::default();
        apply_owner(&rec, &OwnerConfig::default(), &target).unwrap();
        assert_eq!(rec.calls.borrow().last().unwrap().0, target.cover_path);
    }

    #[cfg(unix)]
    #[test]
    fn root_resolves_to_zero() {
        assert_eq!(resolve_user("root"), Some(0));
        assert_eq!(resolve_user(""), None);
    }
}
