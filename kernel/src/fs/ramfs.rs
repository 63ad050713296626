//! In-memory filesystem backing regular files and directories.
//!
//! Every open/read/write/truncate the syscall layer hands to a `File` node
//! not served by `/dev` ends up here: node data lives entirely in a
//! `Vec<u8>` behind a lock, nothing is paged to any backing store, and the
//! whole tree is dropped when its `Arc` refcount reaches zero.

use alloc::{collections::BTreeMap, string::String, sync::Arc, vec::Vec};

use spin::RwLock;

use super::{DirEntry, Filesystem, Metadata, NodeType, Permissions, VfsNode};

struct RamNode {
    node_type: NodeType,
    data: RwLock<Vec<u8>>,
    children: RwLock<BTreeMap<String, Arc<RamNode>>>,
    metadata: RwLock<Metadata>,
    inode: u64,
    parent_inode: RwLock<u64>,
}

fn now() -> u64 {
    crate::arch::x86_64::timer::get_timestamp_ms() / 1000
}

impl RamNode {
    fn new_file(inode: u64, permissions: Permissions) -> Self {
        Self::new(NodeType::File, inode, permissions)
    }

    fn new_directory(inode: u64, permissions: Permissions) -> Self {
        Self::new(NodeType::Directory, inode, permissions)
    }

    fn new(node_type: NodeType, inode: u64, permissions: Permissions) -> Self {
        let ts = now();
        Self {
            node_type,
            data: RwLock::new(Vec::new()),
            children: RwLock::new(BTreeMap::new()),
            metadata: RwLock::new(Metadata {
                node_type,
                size: 0,
                permissions,
                uid: 0,
                gid: 0,
                created: ts,
                modified: ts,
                accessed: ts,
            }),
            inode,
            parent_inode: RwLock::new(inode),
        }
    }
}

impl VfsNode for RamNode {
    fn node_type(&self) -> NodeType {
        self.node_type
    }

    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<usize, &'static str> {
        if self.node_type != NodeType::File {
            return Err("not a file");
        }

        let data = self.data.read();
        if offset >= data.len() {
            return Ok(0);
        }

        let bytes_to_read = core::cmp::min(buffer.len(), data.len() - offset);
        buffer[..bytes_to_read].copy_from_slice(&data[offset..offset + bytes_to_read]);
        self.metadata.write().accessed = now();
        Ok(bytes_to_read)
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<usize, &'static str> {
        if self.node_type != NodeType::File {
            return Err("not a file");
        }

        let mut file_data = self.data.write();
        let end = offset + data.len();
        if end > file_data.len() {
            file_data.resize(end, 0);
        }
        file_data[offset..end].copy_from_slice(data);

        let mut metadata = self.metadata.write();
        metadata.size = file_data.len();
        metadata.modified = now();
        Ok(data.len())
    }

    fn metadata(&self) -> Result<Metadata, &'static str> {
        Ok(self.metadata.read().clone())
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, &'static str> {
        if self.node_type != NodeType::Directory {
            return Err("not a directory");
        }

        let children = self.children.read();
        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push(DirEntry { name: String::from("."), node_type: NodeType::Directory, inode: self.inode });
        entries.push(DirEntry {
            name: String::from(".."),
            node_type: NodeType::Directory,
            inode: *self.parent_inode.read(),
        });
        for (name, child) in children.iter() {
            entries.push(DirEntry { name: name.clone(), node_type: child.node_type, inode: child.inode });
        }
        Ok(entries)
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn VfsNode>, &'static str> {
        if self.node_type != NodeType::Directory {
            return Err("not a directory");
        }
        self.children
            .read()
            .get(name)
            .map(|node| node.clone() as Arc<dyn VfsNode>)
            .ok_or("not found")
    }

    fn create(&self, name: &str, permissions: Permissions) -> Result<Arc<dyn VfsNode>, &'static str> {
        if self.node_type != NodeType::Directory {
            return Err("not a directory");
        }

        let mut children = self.children.write();
        if children.contains_key(name) {
            return Err("already exists");
        }

        let inode = NEXT_INODE.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        let new_file = Arc::new(RamNode::new_file(inode, permissions));
        *new_file.parent_inode.write() = self.inode;
        children.insert(String::from(name), new_file.clone());
        Ok(new_file as Arc<dyn VfsNode>)
    }

    fn mkdir(&self, name: &str, permissions: Permissions) -> Result<Arc<dyn VfsNode>, &'static str> {
        if self.node_type != NodeType::Directory {
            return Err("not a directory");
        }

        let mut children = self.children.write();
        if children.contains_key(name) {
            return Err("already exists");
        }

        let inode = NEXT_INODE.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        let new_dir = Arc::new(RamNode::new_directory(inode, permissions));
        *new_dir.parent_inode.write() = self.inode;
        children.insert(String::from(name), new_dir.clone());
        Ok(new_dir as Arc<dyn VfsNode>)
    }

    fn unlink(&self, name: &str) -> Result<(), &'static str> {
        if self.node_type != NodeType::Directory {
            return Err("not a directory");
        }

        let mut children = self.children.write();
        match children.get(name) {
            Some(node) => {
                if node.node_type == NodeType::Directory && !node.children.read().is_empty() {
                    return Err("directory not empty");
                }
                children.remove(name);
                Ok(())
            }
            None => Err("not found"),
        }
    }

    fn truncate(&self, size: usize) -> Result<(), &'static str> {
        if self.node_type != NodeType::File {
            return Err("not a file");
        }

        self.data.write().resize(size, 0);
        let mut metadata = self.metadata.write();
        metadata.size = size;
        metadata.modified = now();
        Ok(())
    }
}

static NEXT_INODE: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(1);

/// A standalone in-memory tree, mounted as `/` by [`super::init`] and
/// available to mount anywhere else a tmpfs-style scratch area is needed.
pub struct RamFs {
    root: Arc<RamNode>,
}

impl RamFs {
    pub fn new() -> Self {
        let root = Arc::new(RamNode::new_directory(
            NEXT_INODE.fetch_add(1, core::sync::atomic::Ordering::Relaxed),
            Permissions::default(),
        ));
        Self { root }
    }
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Filesystem for RamFs {
    fn root(&self) -> Arc<dyn VfsNode> {
        self.root.clone() as Arc<dyn VfsNode>
    }

    fn name(&self) -> &str {
        "ramfs"
    }

    fn is_readonly(&self) -> bool {
        false
    }

    fn sync(&self) -> Result<(), &'static str> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    #[test]
    fn new_fs_has_directory_root() {
        let fs = RamFs::new();
        assert_eq!(fs.name(), "ramfs");
        assert!(!fs.is_readonly());
        assert_eq!(fs.root().node_type(), NodeType::Directory);
    }

    #[test]
    fn sync_is_a_no_op() {
        assert!(RamFs::new().sync().is_ok());
    }

    #[test]
    fn create_and_read_write_roundtrip() {
        let fs = RamFs::new();
        let root = fs.root();
        let file = root.create("data.txt", Permissions::default()).unwrap();
        assert_eq!(file.write(0, b"Hello, World!").unwrap(), 13);

        let mut buf = vec![0u8; 20];
        let n = file.read(0, &mut buf).unwrap();
        assert_eq!(n, 13);
        assert_eq!(&buf[..13], b"Hello, World!");
    }

    #[test]
    fn create_duplicate_fails() {
        let fs = RamFs::new();
        let root = fs.root();
        root.create("dup.txt", Permissions::default()).unwrap();
        assert_eq!(
            root.create("dup.txt", Permissions::default()).unwrap_err(),
            "already exists"
        );
    }

    #[test]
    fn write_at_offset_overwrites_in_place() {
        let fs = RamFs::new();
        let file = fs.root().create("offset.txt", Permissions::default()).unwrap();
        file.write(0, b"AAAA").unwrap();
        file.write(1, b"BB").unwrap();

        let mut buf = vec![0u8; 4];
        file.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"ABBA");
    }

    #[test]
    fn write_past_eof_zero_fills_the_gap() {
        let fs = RamFs::new();
        let file = fs.root().create("extend.txt", Permissions::default()).unwrap();
        file.write(5, b"end").unwrap();

        let mut buf = vec![0u8; 8];
        assert_eq!(file.read(0, &mut buf).unwrap(), 8);
        assert_eq!(&buf[..5], &[0, 0, 0, 0, 0]);
        assert_eq!(&buf[5..8], b"end");
    }

    #[test]
    fn read_past_eof_returns_zero() {
        let fs = RamFs::new();
        let file = fs.root().create("eof.txt", Permissions::default()).unwrap();
        file.write(0, b"short").unwrap();

        let mut buf = vec![0u8; 10];
        assert_eq!(file.read(100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn directory_rejects_file_ops() {
        let fs = RamFs::new();
        let root = fs.root();
        assert_eq!(root.read(0, &mut [0u8; 1]).unwrap_err(), "not a file");
        assert_eq!(root.write(0, b"x").unwrap_err(), "not a file");
        assert_eq!(root.truncate(0).unwrap_err(), "not a file");
    }

    #[test]
    fn file_metadata_tracks_size() {
        let fs = RamFs::new();
        let file = fs.root().create("meta.txt", Permissions::default()).unwrap();
        file.write(0, b"content").unwrap();
        assert_eq!(file.metadata().unwrap().size, 7);
    }

    #[test]
    fn truncate_shrinks_data_and_metadata() {
        let fs = RamFs::new();
        let file = fs.root().create("trunc.txt", Permissions::default()).unwrap();
        file.write(0, b"Hello, World!").unwrap();
        file.truncate(5).unwrap();

        assert_eq!(file.metadata().unwrap().size, 5);
        let mut buf = vec![0u8; 10];
        assert_eq!(file.read(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"Hello");
    }

    #[test]
    fn mkdir_duplicate_fails() {
        let fs = RamFs::new();
        let root = fs.root();
        root.mkdir("dup", Permissions::default()).unwrap();
        assert_eq!(
            root.mkdir("dup", Permissions::default()).unwrap_err(),
            "already exists"
        );
    }

    #[test]
    fn mkdir_on_file_fails() {
        let fs = RamFs::new();
        let file = fs.root().create("file", Permissions::default()).unwrap();
        assert_eq!(
            file.mkdir("subdir", Permissions::default()).unwrap_err(),
            "not a directory"
        );
    }

    #[test]
    fn lookup_finds_created_entries_and_rejects_missing() {
        let fs = RamFs::new();
        let root = fs.root();
        root.create("myfile", Permissions::default()).unwrap();

        assert_eq!(root.lookup("myfile").unwrap().node_type(), NodeType::File);
        assert_eq!(root.lookup("missing").unwrap_err(), "not found");
    }

    #[test]
    fn readdir_lists_dot_dotdot_and_children() {
        let fs = RamFs::new();
        let root = fs.root();
        root.create("file1", Permissions::default()).unwrap();
        root.mkdir("dir1", Permissions::default()).unwrap();

        let entries = root.readdir().unwrap();
        assert_eq!(entries.len(), 4);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"."));
        assert!(names.contains(&".."));
        assert!(names.contains(&"file1"));
        assert!(names.contains(&"dir1"));
    }

    #[test]
    fn dotdot_inode_points_at_real_parent_not_self() {
        let fs = RamFs::new();
        let root = fs.root();
        let sub = root.mkdir("subdir", Permissions::default()).unwrap();

        let root_inode = root.metadata().unwrap();
        let _ = root_inode;
        let sub_entries = sub.readdir().unwrap();
        let dotdot = sub_entries.iter().find(|e| e.name == "..").unwrap();
        let root_entries = root.readdir().unwrap();
        let dot = root_entries.iter().find(|e| e.name == ".").unwrap();
        assert_eq!(dotdot.inode, dot.inode);
    }

    #[test]
    fn unlink_removes_file_but_refuses_nonempty_directory() {
        let fs = RamFs::new();
        let root = fs.root();
        root.create("victim", Permissions::default()).unwrap();
        assert!(root.unlink("victim").is_ok());
        assert!(root.lookup("victim").is_err());

        let dir = root.mkdir("notempty", Permissions::default()).unwrap();
        dir.create("child", Permissions::default()).unwrap();
        assert_eq!(root.unlink("notempty").unwrap_err(), "directory not empty");
    }

    #[test]
    fn unlink_missing_entry_fails() {
        let fs = RamFs::new();
        assert_eq!(fs.root().unlink("phantom").unwrap_err(), "not found");
    }
}
