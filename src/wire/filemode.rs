//! POSIX file modes as carried by the sync protocol.

use std::fmt;

/// Type bits of a raw mode word, in the order they are tested.
pub const MODE_SYMLINK: u32 = 0o120000;
pub const MODE_DIR: u32 = 0o040000;
pub const MODE_SOCKET: u32 = 0o140000;
pub const MODE_CHAR_DEVICE: u32 = 0o020000;
pub const MODE_BLOCK_DEVICE: u32 = 0o060000;
pub const MODE_FIFO: u32 = 0o010000;
pub const MODE_REGULAR: u32 = 0o100000;

const TYPE_PRECEDENCE: [(u32, FileType); 6] = [
    (MODE_SYMLINK, FileType::Symlink),
    (MODE_DIR, FileType::Directory),
    (MODE_SOCKET, FileType::Socket),
    (MODE_CHAR_DEVICE, FileType::CharDevice),
    (MODE_BLOCK_DEVICE, FileType::BlockDevice),
    (MODE_FIFO, FileType::NamedPipe),
];

bitflags::bitflags! {
    /// The 9 low permission bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Permissions: u32 {
        const OWNER_READ = 0o400;
        const OWNER_WRITE = 0o200;
        const OWNER_EXEC = 0o100;
        const GROUP_READ = 0o040;
        const GROUP_WRITE = 0o020;
        const GROUP_EXEC = 0o010;
        const OTHER_READ = 0o004;
        const OTHER_WRITE = 0o002;
        const OTHER_EXEC = 0o001;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    Socket,
    NamedPipe,
    CharDevice,
    BlockDevice,
}

impl FileType {
    fn ls_char(self) -> char {
        match self {
            FileType::Regular => '-',
            FileType::Directory => 'd',
            FileType::Symlink => 'l',
            FileType::Socket => 's',
            FileType::NamedPipe => 'p',
            FileType::CharDevice => 'c',
            FileType::BlockDevice => 'b',
        }
    }
}

/// A raw 32-bit mode word and its decoded type and permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileMode {
    raw: u32,
    file_type: FileType,
}

impl FileMode {
    /// Decodes a mode word read from the device.
    ///
    /// Type bits are tested by containment in a fixed order (symlink,
    /// directory, socket, char device, block device, fifo) and the first
    /// match wins, so ambiguous words always decode the same way. No match
    /// means a regular file.
    pub fn from_adb(raw: u32) -> Self {
        let file_type = TYPE_PRECEDENCE
            .iter()
            .find(|(bits, _)| raw & bits == *bits)
            .map(|(_, file_type)| *file_type)
            .unwrap_or(FileType::Regular);
        Self { raw, file_type }
    }

    /// The word sent back over the wire. Always the one this mode was built from.
    pub fn to_adb(self) -> u32 {
        self.raw
    }

    pub fn file_type(self) -> FileType {
        self.file_type
    }

    pub fn permissions(self) -> Permissions {
        Permissions::from_bits_truncate(self.raw)
    }

    pub fn is_dir(self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_regular(self) -> bool {
        self.file_type == FileType::Regular
    }

    pub fn is_symlink(self) -> bool {
        self.file_type == FileType::Symlink
    }
}

impl From<Permissions> for FileMode {
    /// A bare permission word, as used when creating files with `SEND`.
    fn from(perms: Permissions) -> Self {
        Self::from_adb(perms.bits())
    }
}

impl fmt::Display for FileMode {
    /// `ls -l` style, e.g. `drwxr-xr-x`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const RWX: [char; 3] = ['r', 'w', 'x'];
        let mut out = String::with_capacity(10);
        out.push(self.file_type.ls_char());
        let bits = self.permissions().bits();
        for i in 0..9 {
            if bits & (0o400 >> i) != 0 {
                out.push(RWX[i % 3]);
            } else {
                out.push('-');
            }
        }
        f.write_str(&out)
    }
}
