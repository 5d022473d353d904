use super::layout::{DirEntry, DirectoryBlock, Inode, DIRECTORY_ENTRIES, MAX_LINKS, ROOT_INODE};
use super::path::parse_path;
use super::{now, FileSystem};
use crate::vfs::{Error, FileRecord, INodeNum, INodeType, Path, Result};
use log::debug;
use zerocopy::{AsBytes, FromZeroes};

/// Occupancy map with every slot taken.
const FULL: u32 = (1 << DIRECTORY_ENTRIES) - 1;

fn occupied_slots(occupancy: u32) -> impl Iterator<Item = usize> {
    (0..DIRECTORY_ENTRIES).filter(move |slot| occupancy & (1 << slot) != 0)
}

impl FileSystem {
    /// The data block of directory `dir`, or `None` if it never held an entry.
    fn directory_block(&self, dir: &Inode) -> Result<Option<DirectoryBlock>> {
        let id = dir.direct(0);
        if id == 0 {
            return Ok(None);
        }
        let mut block = DirectoryBlock::new_zeroed();
        self.store.read(self.data_block(id)?, block.as_bytes_mut())?;
        Ok(Some(block))
    }

    /// Find `name` in directory `dir`, returning its slot and inode number.
    fn lookup(&self, dir: INodeNum, name: &str) -> Result<Option<(usize, INodeNum)>> {
        let inode = self.inode(dir)?;
        if !inode.is_directory() {
            return Err(Error::NotDirectory);
        }
        let Some(block) = self.directory_block(inode)? else {
            return Ok(None);
        };
        for slot in occupied_slots(inode.occupancy()) {
            let entry = &block.entries[slot];
            if entry.name()? == name {
                return Ok(Some((slot, entry.inode())));
            }
        }
        Ok(None)
    }

    /// Inode numbers of every directory passed through while resolving `components`,
    /// starting with the root.
    fn walk(&self, components: &[&str]) -> Result<Vec<INodeNum>> {
        let mut chain = vec![ROOT_INODE];
        let mut dir = ROOT_INODE;
        for name in components {
            let (_, child) = self.lookup(dir, name)?.ok_or(Error::NotFound)?;
            chain.push(child);
            dir = child;
        }
        Ok(chain)
    }

    pub(super) fn resolve(&self, path: &Path) -> Result<INodeNum> {
        parse_path(path)?.iter().try_fold(ROOT_INODE, |dir, name| {
            let (_, child) = self.lookup(dir, name)?.ok_or(Error::NotFound)?;
            Ok(child)
        })
    }

    /// Resolve the directory holding the last component of `path`, and that component.
    ///
    /// Returns `None` for `/`, which has no parent.
    fn resolve_parent<'a>(&self, path: &'a Path) -> Result<Option<(INodeNum, &'a str)>> {
        let components = parse_path(path)?;
        let Some((name, dirs)) = components.split_last() else {
            return Ok(None);
        };
        let chain = self.walk(dirs)?;
        let parent = chain.last().copied().unwrap_or(ROOT_INODE);
        if !self.inode(parent)?.is_directory() {
            return Err(Error::NotDirectory);
        }
        Ok(Some((parent, *name)))
    }

    /// Add the entry `name -> child` to directory `parent`, allocating its data
    /// block on first use.
    fn insert_entry(&mut self, parent: INodeNum, name: &str, child: INodeNum) -> Result<()> {
        let mut dir = *self.inode(parent)?;
        if !dir.is_directory() {
            return Err(Error::NotDirectory);
        }
        let occupancy = dir.occupancy();
        let slot = (!occupancy).trailing_zeros() as usize;
        if slot >= DIRECTORY_ENTRIES {
            return Err(Error::DirectoryFull);
        }
        let (id, mut block, fresh) = match self.directory_block(&dir)? {
            Some(block) => (dir.direct(0), block, false),
            None => {
                let id = self.store.allocate().ok_or(Error::NoSpace)?;
                (id, DirectoryBlock::new_zeroed(), true)
            }
        };
        block.entries[slot] = DirEntry::new(name, child);
        if let Err(e) = self.store.write(id, block.as_bytes()) {
            if fresh {
                self.store.release(id);
            }
            return Err(e.into());
        }
        dir.set_direct(0, id);
        dir.set_occupancy(occupancy | 1 << slot);
        dir.touch(now());
        *self.inode_mut(parent)? = dir;
        Ok(())
    }

    /// Clear `slot` of directory `parent`. The data block stays with the directory.
    fn remove_entry(&mut self, parent: INodeNum, slot: usize) -> Result<()> {
        let mut dir = *self.inode(parent)?;
        if let Some(mut block) = self.directory_block(&dir)? {
            block.entries[slot] = DirEntry::new_zeroed();
            self.store.write(dir.direct(0), block.as_bytes())?;
        }
        dir.set_occupancy(dir.occupancy() & !(1 << slot));
        dir.touch(now());
        *self.inode_mut(parent)? = dir;
        Ok(())
    }

    /// Give `slot` of directory `parent` a new name, keeping its inode.
    fn rename_entry(&mut self, parent: INodeNum, slot: usize, name: &str) -> Result<()> {
        let mut dir = *self.inode(parent)?;
        let Some(mut block) = self.directory_block(&dir)? else {
            return Err(Error::NotFound);
        };
        let inode = block.entries[slot].inode();
        block.entries[slot] = DirEntry::new(name, inode);
        self.store.write(dir.direct(0), block.as_bytes())?;
        dir.touch(now());
        *self.inode_mut(parent)? = dir;
        Ok(())
    }

    /// Create an empty file or directory at `path`.
    pub fn create(&mut self, path: &Path, r#type: INodeType) -> Result<()> {
        // `/` always exists
        let (parent, name) = self.resolve_parent(path)?.ok_or(Error::Exists)?;
        if self.lookup(parent, name)?.is_some() {
            return Err(Error::Exists);
        }
        if self.inode(parent)?.occupancy() & FULL == FULL {
            return Err(Error::DirectoryFull);
        }
        if self.inodes.is_full() {
            return Err(Error::NoFreeINodes);
        }
        let (owner, time) = (self.owner, now());
        let index = self
            .inodes
            .allocate_with(|index| Inode::new(r#type, index as INodeNum, owner, time))
            .ok_or(Error::NoFreeINodes)?;
        let child = index as INodeNum;
        if let Err(e) = self.insert_entry(parent, name, child) {
            self.inodes.release(index);
            return Err(e);
        }
        debug!("blockfs: create {path} ({:?}) -> inode {child}", r#type);
        Ok(())
    }

    /// Remove the entry at `path`.
    ///
    /// The inode and its blocks are freed once its last link is gone, and any
    /// descriptors still open on it are closed.
    pub fn remove(&mut self, path: &Path) -> Result<()> {
        let (parent, name) = self
            .resolve_parent(path)?
            .ok_or(Error::InvalidArgument)?;
        let (slot, target) = self.lookup(parent, name)?.ok_or(Error::NotFound)?;
        let inode = *self.inode(target)?;
        if inode.is_directory() && inode.occupancy() != 0 {
            return Err(Error::NotEmpty);
        }
        self.remove_entry(parent, slot)?;
        debug!("blockfs: remove {path} (inode {target})");
        self.unlink_inode(target)
    }

    /// Drop one link to `target`, freeing it when none are left.
    fn unlink_inode(&mut self, target: INodeNum) -> Result<()> {
        let inode = self.inode_mut(target)?;
        if inode.link_count() > 1 {
            inode.set_link_count(inode.link_count() - 1);
            inode.touch(now());
            return Ok(());
        }
        let inode = *inode;
        self.release_blocks(&inode)?;
        self.inodes.release(target as usize);
        let closed = self.descriptors.release_where(|d| d.inode == target);
        debug!("blockfs: freed inode {target}, closed {closed} descriptors");
        Ok(())
    }

    /// Move the entry at `src` to `dst`. The inode number does not change, so open
    /// descriptors stay valid.
    pub fn rename(&mut self, src: &Path, dst: &Path) -> Result<()> {
        let (src_parent, src_name) = self
            .resolve_parent(src)?
            .ok_or(Error::InvalidArgument)?;
        let (slot, target) = self.lookup(src_parent, src_name)?.ok_or(Error::NotFound)?;

        let components = parse_path(dst)?;
        let Some((dst_name, dst_dirs)) = components.split_last() else {
            return Err(Error::Exists);
        };
        let chain = self.walk(dst_dirs)?;
        if self.inode(target)?.is_directory() && chain.contains(&target) {
            return Err(Error::InvalidMove);
        }
        let dst_parent = chain.last().copied().unwrap_or(ROOT_INODE);
        if self.lookup(dst_parent, dst_name)?.is_some() {
            return Err(Error::Exists);
        }

        if dst_parent == src_parent {
            self.rename_entry(src_parent, slot, dst_name)?;
        } else {
            self.insert_entry(dst_parent, dst_name, target)?;
            self.remove_entry(src_parent, slot)?;
        }
        debug!("blockfs: rename {src} -> {dst} (inode {target})");
        Ok(())
    }

    /// Add a hard link `dst` to the file or directory at `src`.
    pub fn link(&mut self, src: &Path, dst: &Path) -> Result<()> {
        let target = self.resolve(src)?;
        if self.inode(target)?.link_count() == MAX_LINKS {
            return Err(Error::TooManyLinks);
        }
        let (parent, name) = self.resolve_parent(dst)?.ok_or(Error::Exists)?;
        if self.lookup(parent, name)?.is_some() {
            return Err(Error::Exists);
        }
        self.insert_entry(parent, name, target)?;
        let inode = self.inode_mut(target)?;
        inode.set_link_count(inode.link_count() + 1);
        debug!(
            "blockfs: link {src} -> {dst} (inode {target}, {} links)",
            inode.link_count()
        );
        Ok(())
    }

    /// List the directory at `path` in slot order.
    pub fn get_dir(&self, path: &Path) -> Result<Vec<FileRecord>> {
        let number = self.resolve(path)?;
        let dir = self.inode(number)?;
        if !dir.is_directory() {
            return Err(Error::NotDirectory);
        }
        let Some(block) = self.directory_block(dir)? else {
            return Ok(vec![]);
        };
        occupied_slots(dir.occupancy())
            .map(|slot| {
                let entry = &block.entries[slot];
                Ok(FileRecord {
                    name: entry.name()?.to_owned(),
                    r#type: self.inode(entry.inode())?.r#type()?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::super::layout::{INODE_COUNT, NAME_MAX};
    use super::super::test::scratch;
    use super::*;

    fn names(fs: &FileSystem, path: &str) -> Vec<String> {
        fs.get_dir(path)
            .unwrap()
            .into_iter()
            .map(|record| record.name)
            .collect()
    }

    #[test]
    fn create_files_and_folders() {
        let (mut fs, _scratch) = scratch("create", 128);
        let blocks = fs.block_store().used_blocks();
        fs.create("/file", INodeType::File).unwrap();
        // root's data block is claimed by its first entry
        assert_eq!(fs.block_store().used_blocks(), blocks + 1);
        fs.create("/folder", INodeType::Directory).unwrap();
        fs.create("/folder/inner", INodeType::File).unwrap();
        assert_eq!(fs.block_store().used_blocks(), blocks + 2);
        assert_eq!(fs.stat("/file").unwrap().inode, 1);
        assert_eq!(fs.stat("/folder").unwrap().r#type, INodeType::Directory);
        assert_eq!(fs.stat("/folder/inner").unwrap().inode, 3);
    }

    #[test]
    fn create_errors() {
        let (mut fs, _scratch) = scratch("create-errors", 128);
        fs.create("/file", INodeType::File).unwrap();
        fs.create("/folder", INodeType::Directory).unwrap();
        let inodes = fs.free_inodes();
        // missing parent
        assert_eq!(fs.create("/nope/file", INodeType::File), Err(Error::NotFound));
        // root clobber
        assert_eq!(fs.create("/", INodeType::Directory), Err(Error::Exists));
        // already exists, whatever the type
        assert_eq!(fs.create("/file", INodeType::Directory), Err(Error::Exists));
        assert_eq!(fs.create("/folder", INodeType::File), Err(Error::Exists));
        // a file in the middle of the path
        assert_eq!(fs.create("/file/x", INodeType::File), Err(Error::NotDirectory));
        // malformed paths
        assert_eq!(fs.create("file", INodeType::File), Err(Error::InvalidPath));
        assert_eq!(fs.create("/folder/", INodeType::File), Err(Error::InvalidPath));
        assert_eq!(fs.create("", INodeType::File), Err(Error::InvalidPath));
        let long = format!("/{}", "a".repeat(NAME_MAX + 1));
        assert_eq!(fs.create(&long, INodeType::File), Err(Error::NameTooLong));
        let longest = format!("/{}", "a".repeat(NAME_MAX));
        fs.create(&longest, INodeType::File).unwrap();
        assert_eq!(fs.free_inodes(), inodes - 1);
    }

    #[test]
    fn directory_holds_31_entries() {
        let (mut fs, _scratch) = scratch("dir-full", 128);
        fs.create("/d", INodeType::Directory).unwrap();
        for i in 0..DIRECTORY_ENTRIES {
            fs.create(&format!("/d/{i}"), INodeType::File).unwrap();
        }
        let inodes = fs.free_inodes();
        assert_eq!(fs.create("/d/31", INodeType::File), Err(Error::DirectoryFull));
        assert_eq!(fs.create("/d/0", INodeType::File), Err(Error::Exists));
        // nothing was claimed by the failed call
        assert_eq!(fs.free_inodes(), inodes);
        assert_eq!(fs.get_dir("/d").unwrap().len(), DIRECTORY_ENTRIES);
        fs.remove("/d/7").unwrap();
        fs.create("/d/again", INodeType::File).unwrap();
        assert_eq!(names(&fs, "/d")[7], "again");
    }

    #[test]
    fn inode_table_exhaustion() {
        let (mut fs, _scratch) = scratch("inodes-full", 512);
        // 255 inodes besides the root, spread over directories of at most 31 entries
        let mut created = 0;
        'outer: for d in 0..9 {
            fs.create(&format!("/d{d}"), INodeType::Directory).unwrap();
            created += 1;
            for f in 0..30 {
                if created == INODE_COUNT - 1 {
                    break 'outer;
                }
                fs.create(&format!("/d{d}/f{f}"), INodeType::File).unwrap();
                created += 1;
            }
        }
        assert_eq!(fs.free_inodes(), 0);
        let blocks = fs.block_store().used_blocks();
        // /d8 still has room, so only the inode table can be the problem
        assert_eq!(fs.create("/d8/extra", INodeType::File), Err(Error::NoFreeINodes));
        assert_eq!(fs.block_store().used_blocks(), blocks);
        fs.remove("/d0/f0").unwrap();
        fs.create("/d8/extra", INodeType::File).unwrap();
    }

    #[test]
    fn failed_create_releases_inode() {
        // 7 blocks: metadata, one free block, the bitmap
        let (mut fs, _scratch) = scratch("no-space", 7);
        fs.create("/d", INodeType::Directory).unwrap();
        // root took the only data block, so /d cannot get one
        assert_eq!(fs.block_store().free_blocks(), 0);
        let inodes = fs.free_inodes();
        assert_eq!(fs.create("/d/f", INodeType::File), Err(Error::NoSpace));
        assert_eq!(fs.free_inodes(), inodes);
    }

    #[test]
    fn get_dir_listing() {
        let (mut fs, _scratch) = scratch("get-dir", 128);
        assert!(fs.get_dir("/").unwrap().is_empty());
        fs.create("/file", INodeType::File).unwrap();
        fs.create("/folder", INodeType::Directory).unwrap();
        assert_eq!(
            fs.get_dir("/").unwrap(),
            vec![
                FileRecord {
                    name: "file".into(),
                    r#type: INodeType::File
                },
                FileRecord {
                    name: "folder".into(),
                    r#type: INodeType::Directory
                },
            ]
        );
        assert!(fs.get_dir("/folder").unwrap().is_empty());
        assert_eq!(fs.get_dir("/file"), Err(Error::NotDirectory));
        assert_eq!(fs.get_dir("/missing"), Err(Error::NotFound));
        assert_eq!(fs.get_dir("folder"), Err(Error::InvalidPath));
    }

    #[test]
    fn remove_directories() {
        let (mut fs, _scratch) = scratch("remove-dir", 128);
        fs.create("/a", INodeType::Directory).unwrap();
        fs.create("/a/b", INodeType::File).unwrap();
        assert_eq!(fs.remove("/a"), Err(Error::NotEmpty));
        assert_eq!(names(&fs, "/a"), ["b"]);
        assert_eq!(fs.remove("/"), Err(Error::InvalidArgument));
        assert_eq!(fs.remove("/a/c"), Err(Error::NotFound));
        let blocks = fs.block_store().used_blocks();
        fs.remove("/a/b").unwrap();
        fs.remove("/a").unwrap();
        // /a's data block is given back
        assert_eq!(fs.block_store().used_blocks(), blocks - 1);
        assert!(fs.get_dir("/").unwrap().is_empty());
        assert_eq!(fs.free_inodes(), INODE_COUNT - 1);
    }

    #[test]
    fn rename_entries() {
        let (mut fs, _scratch) = scratch("rename", 128);
        fs.create("/a", INodeType::Directory).unwrap();
        fs.create("/a/b", INodeType::Directory).unwrap();
        fs.create("/f", INodeType::File).unwrap();
        let fd = fs.open("/f").unwrap();
        fs.write(fd, b"moving").unwrap();
        let inode = fs.stat("/f").unwrap().inode;

        fs.rename("/f", "/g").unwrap();
        assert_eq!(names(&fs, "/"), ["a", "g"]);
        fs.rename("/g", "/a/b/h").unwrap();
        assert_eq!(fs.stat("/a/b/h").unwrap().inode, inode);
        assert_eq!(names(&fs, "/"), ["a"]);
        // the descriptor follows the inode, not the path
        fs.seek(fd, 0, crate::vfs::SeekFrom::Start).unwrap();
        let mut buf = [0; 6];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 6);
        assert_eq!(&buf, b"moving");

        fs.rename("/a/b", "/b").unwrap();
        assert_eq!(fs.stat("/b/h").unwrap().inode, inode);
    }

    #[test]
    fn rename_errors() {
        let (mut fs, _scratch) = scratch("rename-errors", 128);
        fs.create("/a", INodeType::Directory).unwrap();
        fs.create("/a/b", INodeType::Directory).unwrap();
        fs.create("/f", INodeType::File).unwrap();
        assert_eq!(fs.rename("/a", "/a/b/a"), Err(Error::InvalidMove));
        assert_eq!(fs.rename("/a", "/a/x"), Err(Error::InvalidMove));
        assert_eq!(fs.rename("/f", "/a"), Err(Error::Exists));
        assert_eq!(fs.rename("/f", "/f"), Err(Error::Exists));
        assert_eq!(fs.rename("/missing", "/x"), Err(Error::NotFound));
        assert_eq!(fs.rename("/f", "/missing/x"), Err(Error::NotFound));
        assert_eq!(fs.rename("/f", "/f/x"), Err(Error::NotDirectory));
        assert_eq!(fs.rename("/", "/x"), Err(Error::InvalidArgument));
        assert_eq!(fs.rename("/f", "/"), Err(Error::Exists));
        for i in 0..DIRECTORY_ENTRIES {
            fs.create(&format!("/a/b/{i}"), INodeType::File).unwrap();
        }
        assert_eq!(fs.rename("/f", "/a/b/f"), Err(Error::DirectoryFull));
        // still in place after every failure
        assert_eq!(names(&fs, "/"), ["a", "f"]);
    }

    #[test]
    fn hard_links() {
        let (mut fs, _scratch) = scratch("link", 128);
        fs.create("/f", INodeType::File).unwrap();
        fs.create("/d", INodeType::Directory).unwrap();
        fs.link("/f", "/d/g").unwrap();
        assert_eq!(fs.stat("/d/g").unwrap().inode, fs.stat("/f").unwrap().inode);
        assert_eq!(fs.stat("/f").unwrap().nlink, 2);
        assert_eq!(fs.link("/f", "/d/g"), Err(Error::Exists));
        assert_eq!(fs.link("/missing", "/x"), Err(Error::NotFound));
        assert_eq!(fs.link("/f", "/"), Err(Error::Exists));
        // the inode survives until its last name goes
        fs.remove("/f").unwrap();
        assert_eq!(fs.stat("/d/g").unwrap().nlink, 1);
        fs.remove("/d/g").unwrap();
        assert_eq!(fs.free_inodes(), INODE_COUNT - 2);
    }

    #[test]
    fn directory_hard_links() {
        let (mut fs, _scratch) = scratch("link-dir", 128);
        fs.create("/d", INodeType::Directory).unwrap();
        fs.link("/d", "/e").unwrap();
        let info = fs.stat("/e").unwrap();
        assert_eq!(info.r#type, INodeType::Directory);
        assert_eq!(info.inode, fs.stat("/d").unwrap().inode);
        assert_eq!(info.nlink, 2);

        // both names show the same entries
        fs.create("/e/x", INodeType::File).unwrap();
        assert_eq!(fs.get_dir("/d").unwrap(), fs.get_dir("/e").unwrap());
        assert_eq!(names(&fs, "/d"), ["x"]);
        assert_eq!(fs.remove("/d"), Err(Error::NotEmpty));

        fs.remove("/d/x").unwrap();
        fs.remove("/d").unwrap();
        assert_eq!(fs.stat("/d"), Err(Error::NotFound));
        assert_eq!(fs.stat("/e").unwrap().nlink, 1);
        assert!(fs.get_dir("/e").unwrap().is_empty());
        fs.remove("/e").unwrap();
        assert_eq!(fs.free_inodes(), INODE_COUNT - 1);
    }

    #[test]
    fn link_count_limit() {
        let (mut fs, _scratch) = scratch("link-limit", 128);
        fs.create("/f", INodeType::File).unwrap();
        let mut links = 1;
        'outer: for d in 0..9 {
            fs.create(&format!("/d{d}"), INodeType::Directory).unwrap();
            for i in 0..DIRECTORY_ENTRIES {
                if links == MAX_LINKS {
                    break 'outer;
                }
                fs.link("/f", &format!("/d{d}/{i}")).unwrap();
                links += 1;
            }
        }
        assert_eq!(fs.stat("/f").unwrap().nlink, MAX_LINKS);
        assert_eq!(fs.link("/f", "/one-more"), Err(Error::TooManyLinks));
    }
}
