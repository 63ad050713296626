//! `/dev` mount point.
//!
//! Exposes the small set of device nodes the rest of the kernel needs a
//! path for (`/dev/null`, `/dev/zero`) as plain [`VfsNode`]s. Everything a
//! real device filesystem would also carry — TTY line discipline, `/dev`
//! hotplug, character/block major:minor dispatch to an actual driver
//! registry — is a named boundary this module does not implement; the
//! PS/2 and console drivers are reached through [`super::file::OpenFileBackend`]
//! instead of through a `/dev` node.

use alloc::{collections::BTreeMap, string::String, sync::Arc, vec::Vec};
use spin::RwLock;

use super::{DirEntry, Filesystem, Metadata, NodeType, Permissions, VfsNode};

struct DevNode {
    name: String,
}

impl VfsNode for DevNode {
    fn node_type(&self) -> NodeType {
        NodeType::CharDevice
    }

    fn read(&self, _offset: usize, buffer: &mut [u8]) -> Result<usize, &'static str> {
        match self.name.as_str() {
            "null" => Ok(0),
            "zero" => {
                buffer.fill(0);
                Ok(buffer.len())
            }
            _ => Err("device not implemented"),
        }
    }

    fn write(&self, _offset: usize, data: &[u8]) -> Result<usize, &'static str> {
        match self.name.as_str() {
            "null" | "zero" => Ok(data.len()),
            _ => Err("device not implemented"),
        }
    }

    fn metadata(&self) -> Result<Metadata, &'static str> {
        Ok(Metadata {
            node_type: NodeType::CharDevice,
            size: 0,
            permissions: Permissions::default(),
            uid: 0,
            gid: 0,
            created: 0,
            modified: 0,
            accessed: 0,
        })
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, &'static str> {
        Err("not a directory")
    }

    fn lookup(&self, _name: &str) -> Result<Arc<dyn VfsNode>, &'static str> {
        Err("not a directory")
    }

    fn create(&self, _name: &str, _permissions: Permissions) -> Result<Arc<dyn VfsNode>, &'static str> {
        Err("cannot create files in device")
    }

    fn mkdir(&self, _name: &str, _permissions: Permissions) -> Result<Arc<dyn VfsNode>, &'static str> {
        Err("cannot create directories in device")
    }

    fn unlink(&self, _name: &str) -> Result<(), &'static str> {
        Err("cannot unlink device")
    }

    fn truncate(&self, _size: usize) -> Result<(), &'static str> {
        Err("cannot truncate device")
    }
}

struct DevRoot {
    devices: RwLock<BTreeMap<String, Arc<DevNode>>>,
}

impl DevRoot {
    fn new() -> Self {
        let mut devices = BTreeMap::new();
        for name in ["null", "zero"] {
            devices.insert(String::from(name), Arc::new(DevNode { name: String::from(name) }));
        }
        Self { devices: RwLock::new(devices) }
    }
}

impl VfsNode for DevRoot {
    fn node_type(&self) -> NodeType {
        NodeType::Directory
    }

    fn read(&self, _offset: usize, _buffer: &mut [u8]) -> Result<usize, &'static str> {
        Err("cannot read directory")
    }

    fn write(&self, _offset: usize, _data: &[u8]) -> Result<usize, &'static str> {
        Err("cannot write to directory")
    }

    fn metadata(&self) -> Result<Metadata, &'static str> {
        Ok(Metadata {
            node_type: NodeType::Directory,
            size: 0,
            permissions: Permissions::default(),
            uid: 0,
            gid: 0,
            created: 0,
            modified: 0,
            accessed: 0,
        })
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, &'static str> {
        let devices = self.devices.read();
        let mut entries = Vec::with_capacity(devices.len() + 2);
        entries.push(DirEntry { name: String::from("."), node_type: NodeType::Directory, inode: 0 });
        entries.push(DirEntry { name: String::from(".."), node_type: NodeType::Directory, inode: 0 });
        for (name, device) in devices.iter() {
            entries.push(DirEntry { name: name.clone(), node_type: device.node_type(), inode: 0 });
        }
        Ok(entries)
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn VfsNode>, &'static str> {
        self.devices.read().get(name).map(|node| node.clone() as Arc<dyn VfsNode>).ok_or("device not found")
    }

    fn create(&self, _name: &str, _permissions: Permissions) -> Result<Arc<dyn VfsNode>, &'static str> {
        Err("cannot create files in /dev")
    }

    fn mkdir(&self, _name: &str, _permissions: Permissions) -> Result<Arc<dyn VfsNode>, &'static str> {
        Err("cannot create directories in /dev")
    }

    fn unlink(&self, _name: &str) -> Result<(), &'static str> {
        Err("cannot unlink from /dev")
    }

    fn truncate(&self, _size: usize) -> Result<(), &'static str> {
        Err("cannot truncate directory")
    }
}

/// `/dev` mount: a fixed, flat directory of the two nodes above.
pub struct DevFs {
    root: Arc<DevRoot>,
}

impl DevFs {
    pub fn new() -> Self {
        Self { root: Arc::new(DevRoot::new()) }
    }
}

impl Default for DevFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Filesystem for DevFs {
    fn root(&self) -> Arc<dyn VfsNode> {
        self.root.clone() as Arc<dyn VfsNode>
    }

    fn name(&self) -> &str {
        "devfs"
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
    use super::*;

    #[test]
    fn null_reads_as_eof_and_discards_writes() {
        let fs = DevFs::new();
        let null = fs.root().lookup("null").unwrap();
        let mut buf = [0xAAu8; 8];
        assert_eq!(null.read(0, &mut buf).unwrap(), 0);
        assert_eq!(null.write(0, b"discarded").unwrap(), 9);
    }

    #[test]
    fn zero_fills_reads() {
        let fs = DevFs::new();
        let zero = fs.root().lookup("zero").unwrap();
        let mut buf = [0xAAu8; 8];
        assert_eq!(zero.read(0, &mut buf).unwrap(), 8);
        assert_eq!(buf, [0u8; 8]);
    }

    #[test]
    fn unknown_device_is_absent() {
        let fs = DevFs::new();
        assert!(fs.root().lookup("urandom").is_err());
    }
}
