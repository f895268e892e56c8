//! 文件内容指纹

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_BUF_SIZE: usize = 64 * 1024;

/// 计算文件指纹：SHA-256(内容 + 相对路径)，十六进制小写
///
/// 路径参与哈希，相同内容放在不同位置也会得到不同的指纹。
pub fn hash_file(abs_path: &Path, rel_path: &str) -> io::Result<String> {
    let mut file = File::open(abs_path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    hasher.update(rel_path.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// 对内存数据计算同样的指纹
pub fn hash_bytes(content: &[u8], rel_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher.update(rel_path.as_bytes());
    format!("{:x}", hasher.finalize())
}
