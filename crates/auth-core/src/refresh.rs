//! 刷新令牌
//!
//! 刷新令牌是不含任何声明的高熵随机串，只作为查找键使用。
//! 服务端只保存其 SHA-256 指纹，明文仅返回给客户端一次。

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// 随机字节长度
const REFRESH_TOKEN_BYTES: usize = 32;

/// 客户端提交的刷新令牌最大长度
pub const MAX_REFRESH_TOKEN_LEN: usize = 128;

/// 新生成的刷新令牌
#[derive(Debug, Clone)]
pub struct RefreshToken {
    /// 返回给客户端的明文
    pub token: String,
    /// 服务端保存的指纹（刷新令牌 ID）
    pub id: String,
}

impl RefreshToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);
        let id = Self::fingerprint(&token);
        Self { token, id }
    }

    /// 计算刷新令牌 ID
    pub fn fingerprint(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    /// 粗略校验客户端提交的令牌格式
    pub fn is_well_formed(token: &str) -> bool {
        !token.is_empty()
            && token.len() <= MAX_REFRESH_TOKEN_LEN
            && token
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }
}
