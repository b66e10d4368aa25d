// In-memory filesystem backend
//
// Inodes live in a concurrent inode table keyed by inode number. Directories
// map child names to inode numbers; "." and ".." are not stored, the I/O
// channel synthesizes them when listing a directory.

use crate::interface::{
    self, Dirent, DirentType, FileHandle, FileSystem, OpenFlags, StatData, VfsError,
};

use super::syscalls::fs_constants::*;

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const ROOTDIRECTORYINODE: usize = 1;

const RAMFS_DEV_ID: u64 = 20;

#[derive(Debug)]
pub enum Inode {
    File(GenericInode),
    Dir(DirectoryInode),
}

#[derive(Debug)]
pub struct GenericInode {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub contents: Arc<RwLock<Vec<u8>>>,
}

#[derive(Debug)]
pub struct DirectoryInode {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub filename_to_inode_dict: BTreeMap<String, usize>,
}

impl Inode {
    fn stat(&self, inodenum: usize) -> StatData {
        match self {
            Inode::File(f) => StatData {
                st_dev: RAMFS_DEV_ID,
                st_ino: inodenum as u64,
                st_mode: f.mode,
                st_uid: f.uid,
                st_gid: f.gid,
                st_size: f.contents.read().len() as u64,
            },
            Inode::Dir(d) => StatData {
                st_dev: RAMFS_DEV_ID,
                st_ino: inodenum as u64,
                st_mode: d.mode,
                st_uid: d.uid,
                st_gid: d.gid,
                st_size: d.filename_to_inode_dict.len() as u64,
            },
        }
    }

    fn dirent_type(&self) -> DirentType {
        match self {
            Inode::File(_) => DirentType::File,
            Inode::Dir(_) => DirentType::Directory,
        }
    }
}

/// A filesystem whose contents vanish with the process.
#[derive(Debug)]
pub struct RamFileSystem {
    nextinode: AtomicUsize,
    inodetable: DashMap<usize, Inode>,
}

impl RamFileSystem {
    pub fn new() -> Arc<RamFileSystem> {
        let inodetable = DashMap::new();
        inodetable.insert(
            ROOTDIRECTORYINODE,
            Inode::Dir(DirectoryInode {
                uid: DEFAULT_UID,
                gid: DEFAULT_GID,
                mode: S_IFDIR | 0o755,
                filename_to_inode_dict: BTreeMap::new(),
            }),
        );
        Arc::new(RamFileSystem {
            nextinode: AtomicUsize::new(ROOTDIRECTORYINODE + 1),
            inodetable,
        })
    }

    //returns tuple consisting of inode number of file (if it exists), and inode number of parent (if it exists)
    fn metawalkandparent(&self, path: &str) -> Result<(Option<usize>, Option<usize>), VfsError> {
        let mut inodeno = Some(ROOTDIRECTORYINODE);
        let mut previnodeno = None;

        for comp in interface::RustPath::new(path).components() {
            match comp {
                interface::RustPathComponent::RootDir | interface::RustPathComponent::CurDir => {}
                interface::RustPathComponent::Normal(f) => {
                    //a missing intermediate directory means the whole path is missing
                    let cur = match inodeno {
                        Some(cur) => cur,
                        None => {
                            return Err(VfsError::NotFound {
                                path: path.to_string(),
                            })
                        }
                    };
                    let node = self.inodetable.get(&cur).ok_or_else(|| VfsError::NotFound {
                        path: path.to_string(),
                    })?;
                    match &*node {
                        Inode::Dir(d) => {
                            previnodeno = inodeno;
                            inodeno = d
                                .filename_to_inode_dict
                                .get(&*f.to_string_lossy())
                                .copied();
                        }
                        Inode::File(_) => {
                            return Err(VfsError::NotADirectory {
                                path: path.to_string(),
                            })
                        }
                    }
                }
                _ => {
                    return Err(VfsError::NotFound {
                        path: path.to_string(),
                    })
                }
            }
        }
        Ok((inodeno, previnodeno))
    }

    fn metawalk(&self, path: &str) -> Result<usize, VfsError> {
        self.metawalkandparent(path)?
            .0
            .ok_or_else(|| VfsError::NotFound {
                path: path.to_string(),
            })
    }

    fn filename(path: &str) -> Result<String, VfsError> {
        interface::RustPath::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| VfsError::AlreadyExists {
                path: path.to_string(),
            })
    }

    fn link_new(&self, path: &str, parent: usize, inode: Inode) -> Result<usize, VfsError> {
        let name = Self::filename(path)?;
        // no inode is allocated unless the parent can take the name
        match self.inodetable.get(&parent).as_deref() {
            Some(Inode::Dir(_)) => {}
            Some(Inode::File(_)) => {
                return Err(VfsError::NotADirectory {
                    path: path.to_string(),
                })
            }
            None => {
                return Err(VfsError::NotFound {
                    path: path.to_string(),
                })
            }
        }

        // the parent guard must be dropped before inserting into the same map
        let newinodenum = self.nextinode.fetch_add(1, Ordering::SeqCst);
        self.inodetable.insert(newinodenum, inode);
        if let Some(Inode::Dir(d)) = self.inodetable.get_mut(&parent).as_deref_mut() {
            d.filename_to_inode_dict.insert(name, newinodenum);
            return Ok(newinodenum);
        }
        self.inodetable.remove(&newinodenum);
        Err(VfsError::NotFound {
            path: path.to_string(),
        })
    }

    /// Creates directory `path` and any missing parents.
    pub fn mkdir_all(&self, path: &str) -> Result<(), VfsError> {
        let mut sofar = interface::RustPathBuf::from("/");
        for comp in interface::RustPath::new(path).components() {
            if let interface::RustPathComponent::Normal(_) = comp {
                sofar.push(comp);
                let current = sofar.to_string_lossy().into_owned();
                match self.metawalkandparent(&current)? {
                    (Some(existing), _) => {
                        if let Some(node) = self.inodetable.get(&existing) {
                            if let Inode::File(_) = &*node {
                                return Err(VfsError::NotADirectory { path: current });
                            }
                        }
                    }
                    (None, Some(parent)) => {
                        self.link_new(
                            &current,
                            parent,
                            Inode::Dir(DirectoryInode {
                                uid: DEFAULT_UID,
                                gid: DEFAULT_GID,
                                mode: S_IFDIR | 0o755,
                                filename_to_inode_dict: BTreeMap::new(),
                            }),
                        )?;
                    }
                    (None, None) => return Err(VfsError::NotFound { path: current }),
                }
            }
        }
        Ok(())
    }

    /// Creates or replaces the regular file at `path`, creating parents.
    pub fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), VfsError> {
        if let Some(parent) = interface::RustPath::new(path).parent() {
            self.mkdir_all(&parent.to_string_lossy())?;
        }
        let mut handle = self.open(path, OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::TRUNC)?;
        let mut written = 0;
        while written < contents.len() {
            written += handle.write(&contents[written..])?;
        }
        Ok(())
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, VfsError> {
        let inodenum = self.metawalk(path)?;
        let node = self.inodetable.get(&inodenum).ok_or_else(|| VfsError::NotFound {
            path: path.to_string(),
        })?;
        match &*node {
            Inode::File(f) => Ok(f.contents.read().clone()),
            Inode::Dir(_) => Err(VfsError::IsADirectory {
                path: path.to_string(),
            }),
        }
    }
}

impl FileSystem for RamFileSystem {
    fn stat(&self, path: &str) -> Result<StatData, VfsError> {
        let inodenum = self.metawalk(path)?;
        let node = self.inodetable.get(&inodenum).ok_or_else(|| VfsError::NotFound {
            path: path.to_string(),
        })?;
        Ok(node.stat(inodenum))
    }

    fn dirent(&self, path: &str, index: usize) -> Result<Option<Dirent>, VfsError> {
        let inodenum = self.metawalk(path)?;
        let (name, childnum) = {
            let node = self.inodetable.get(&inodenum).ok_or_else(|| VfsError::NotFound {
                path: path.to_string(),
            })?;
            let dir = match &*node {
                Inode::Dir(d) => d,
                Inode::File(_) => {
                    return Err(VfsError::NotADirectory {
                        path: path.to_string(),
                    })
                }
            };
            match dir.filename_to_inode_dict.iter().nth(index) {
                Some((name, num)) => (name.clone(), *num),
                None => return Ok(None),
            }
        };

        let kind = self
            .inodetable
            .get(&childnum)
            .map(|child| child.dirent_type())
            .unwrap_or(DirentType::File);
        Ok(Some(Dirent {
            fileno: childnum as u64,
            kind,
            name,
        }))
    }

    fn open(&self, path: &str, flags: OpenFlags) -> Result<Box<dyn FileHandle>, VfsError> {
        let inodenum = match self.metawalkandparent(path)? {
            (Some(inodenum), _) => inodenum,
            (None, Some(parent)) => {
                if !flags.contains(OpenFlags::CREAT) {
                    return Err(VfsError::NotFound {
                        path: path.to_string(),
                    });
                }
                self.link_new(
                    path,
                    parent,
                    Inode::File(GenericInode {
                        uid: DEFAULT_UID,
                        gid: DEFAULT_GID,
                        mode: S_IFREG | 0o644,
                        contents: Arc::new(RwLock::new(Vec::new())),
                    }),
                )?
            }
            (None, None) => {
                return Err(VfsError::NotFound {
                    path: path.to_string(),
                })
            }
        };

        let node = self.inodetable.get(&inodenum).ok_or_else(|| VfsError::NotFound {
            path: path.to_string(),
        })?;
        let stat = node.stat(inodenum);
        let contents = match &*node {
            Inode::File(f) => {
                if flags.contains(OpenFlags::TRUNC) && flags.is_writable() {
                    f.contents.write().clear();
                }
                Some(f.contents.clone())
            }
            Inode::Dir(_) => {
                if flags.is_writable() {
                    return Err(VfsError::IsADirectory {
                        path: path.to_string(),
                    });
                }
                None
            }
        };

        Ok(Box::new(RamFileHandle {
            path: path.to_string(),
            stat,
            contents,
            position: 0,
            flags,
        }))
    }
}

struct RamFileHandle {
    path: String,
    stat: StatData,
    contents: Option<Arc<RwLock<Vec<u8>>>>,
    position: usize,
    flags: OpenFlags,
}

impl RamFileHandle {
    fn contents(&self) -> Result<&Arc<RwLock<Vec<u8>>>, VfsError> {
        self.contents.as_ref().ok_or_else(|| VfsError::IsADirectory {
            path: self.path.clone(),
        })
    }
}

impl FileHandle for RamFileHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, VfsError> {
        if !self.flags.is_readable() {
            return Err(VfsError::PermissionDenied {
                path: self.path.clone(),
            });
        }
        let n = {
            let contents = self.contents()?.read();
            let start = self.position.min(contents.len());
            let n = buf.len().min(contents.len() - start);
            buf[..n].copy_from_slice(&contents[start..start + n]);
            n
        };
        self.position += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, VfsError> {
        if !self.flags.is_writable() {
            return Err(VfsError::PermissionDenied {
                path: self.path.clone(),
            });
        }
        let append = self.flags.contains(OpenFlags::APPEND);
        let position = {
            let mut contents = self.contents()?.write();
            let start = if append {
                contents.len()
            } else {
                self.position
            };
            if contents.len() < start {
                contents.resize(start, 0);
            }
            let overlap = (contents.len() - start).min(buf.len());
            contents[start..start + overlap].copy_from_slice(&buf[..overlap]);
            contents.extend_from_slice(&buf[overlap..]);
            start + buf.len()
        };
        self.position = position;
        Ok(buf.len())
    }

    fn stat(&self) -> Result<StatData, VfsError> {
        let mut stat = self.stat;
        if let Some(contents) = &self.contents {
            stat.st_size = contents.read().len() as u64;
        }
        Ok(stat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let fs = RamFileSystem::new();
        fs.write_file("/etc/motd", b"hello").unwrap();
        assert_eq!(fs.read_file("/etc/motd").unwrap(), b"hello");
        assert_eq!(fs.stat("/etc").unwrap().st_mode & S_FILETYPEFLAGS, S_IFDIR);
        assert_eq!(fs.stat("/etc/motd").unwrap().st_size, 5);
    }

    #[test]
    fn missing_paths_and_file_parents() {
        let fs = RamFileSystem::new();
        fs.write_file("/a", b"x").unwrap();
        assert!(matches!(fs.stat("/nope"), Err(VfsError::NotFound { .. })));
        assert!(matches!(
            fs.open("/a/b", OpenFlags::RDONLY),
            Err(VfsError::NotADirectory { .. })
        ));
        assert!(matches!(
            fs.open("/", OpenFlags::WRONLY),
            Err(VfsError::IsADirectory { .. })
        ));
    }

    #[test]
    fn failed_link_allocates_no_inode() {
        let fs = RamFileSystem::new();
        fs.write_file("/a", b"x").unwrap();
        let file_ino = fs.stat("/a").unwrap().st_ino as usize;
        let before = fs.inodetable.len();
        let orphan = || {
            Inode::File(GenericInode {
                uid: 0,
                gid: 0,
                mode: S_IFREG | 0o644,
                contents: Arc::new(RwLock::new(Vec::new())),
            })
        };
        assert!(matches!(
            fs.link_new("/a/b", file_ino, orphan()),
            Err(VfsError::NotADirectory { .. })
        ));
        assert!(matches!(
            fs.link_new("/gone/b", 9999, orphan()),
            Err(VfsError::NotFound { .. })
        ));
        assert_eq!(fs.inodetable.len(), before);
    }

    #[test]
    fn dirent_lists_children_in_name_order() {
        let fs = RamFileSystem::new();
        fs.write_file("/d/b", b"").unwrap();
        fs.mkdir_all("/d/a").unwrap();
        let first = fs.dirent("/d", 0).unwrap().unwrap();
        let second = fs.dirent("/d", 1).unwrap().unwrap();
        assert_eq!((first.name.as_str(), first.kind), ("a", DirentType::Directory));
        assert_eq!((second.name.as_str(), second.kind), ("b", DirentType::File));
        assert!(fs.dirent("/d", 2).unwrap().is_none());
    }
}
