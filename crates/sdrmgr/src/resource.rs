// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RF resource descriptors.
//!
//! Loaded once at startup from a TOML file:
//!
//! ```toml
//! [[resource]]
//! uuid = "4b1f6c0e-2f7e-4a53-9d55-0f8e1c1e0a01"
//! name = "rx0"
//! rx_chans = 2
//! max_sample_rate = 61440000
//! min_freq = 70000000
//! max_freq = 6000000000
//! ```
//!
//! On the wire a descriptor is 14 big-endian words:
//!
//! ```text
//! uuid (4) | name (4, zero padded) | tx[31:24] rx[23:16] | max rate | min freq (2) | max freq (2)
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigError, MbufError};
use crate::list::GrowList;
use crate::mbuf::Mbuf;

/// Descriptor size on the wire, in words.
pub const RESOURCE_WORDS: usize = 14;

/// Name bytes on the wire.
pub const NAME_LEN: usize = 16;

/// One controllable RF resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub tx_chans: u8,
    #[serde(default)]
    pub rx_chans: u8,
    #[serde(default)]
    pub max_sample_rate: u32,
    #[serde(default)]
    pub min_freq: u64,
    #[serde(default)]
    pub max_freq: u64,
}

impl Resource {
    pub fn new(uuid: Uuid, name: &str) -> Self {
        Self {
            uuid,
            name: name.to_string(),
            tx_chans: 0,
            rx_chans: 0,
            max_sample_rate: 0,
            min_freq: 0,
            max_freq: 0,
        }
    }

    pub(crate) fn decode<U>(mbuf: &mut Mbuf<U>) -> Result<Self, MbufError> {
        let want = RESOURCE_WORDS * 4;
        if mbuf.available() < want {
            return Err(MbufError::Underrun {
                want,
                have: mbuf.available(),
            });
        }
        let mut uuid = [0u8; 16];
        mbuf.get_bytes(&mut uuid);
        let mut name = [0u8; NAME_LEN];
        mbuf.get_bytes(&mut name);
        let name_len = name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);

        let chans = mbuf.get_be32()?;
        Ok(Self {
            uuid: Uuid::from_bytes(uuid),
            name: String::from_utf8_lossy(&name[..name_len]).into_owned(),
            tx_chans: (chans >> 24) as u8,
            rx_chans: (chans >> 16) as u8,
            max_sample_rate: mbuf.get_be32()?,
            min_freq: mbuf.get_be64()?,
            max_freq: mbuf.get_be64()?,
        })
    }

    /// Encode; names longer than 16 bytes are truncated.
    pub(crate) fn encode<U>(&self, mbuf: &mut Mbuf<U>) -> Result<(), MbufError> {
        let want = RESOURCE_WORDS * 4;
        if mbuf.room() < want {
            return Err(MbufError::Overrun {
                want,
                room: mbuf.room(),
            });
        }
        let mut name = [0u8; NAME_LEN];
        let len = self.name.len().min(NAME_LEN);
        name[..len].copy_from_slice(&self.name.as_bytes()[..len]);

        mbuf.set_bytes_exact(self.uuid.as_bytes())?;
        mbuf.set_bytes_exact(&name)?;
        mbuf.set_be32(((self.tx_chans as u32) << 24) | ((self.rx_chans as u32) << 16))?;
        mbuf.set_be32(self.max_sample_rate)?;
        mbuf.set_be64(self.min_freq)?;
        mbuf.set_be64(self.max_freq)?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ResourceFile {
    #[serde(default)]
    resource: Vec<Resource>,
}

/// Resources known to the manager, searched by UUID.
#[derive(Debug, Default)]
pub struct ResourceList {
    items: GrowList<Resource>,
}

impl ResourceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a resource file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let file: ResourceFile = toml::from_str(content)?;
        let mut list = Self::new();
        for resource in file.resource {
            if list.find(&resource.uuid).is_some() {
                return Err(ConfigError::Invalid(format!(
                    "duplicate resource uuid {}",
                    resource.uuid
                )));
            }
            if resource.name.len() > NAME_LEN {
                return Err(ConfigError::Invalid(format!(
                    "resource name '{}' longer than {NAME_LEN} bytes",
                    resource.name
                )));
            }
            list.push(resource);
        }
        Ok(list)
    }

    pub fn push(&mut self, resource: Resource) {
        self.items.push(resource);
    }

    pub fn find(&self, uuid: &Uuid) -> Option<&Resource> {
        self.items.find(|r| r.uuid == *uuid)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[resource]]
        uuid = "4b1f6c0e-2f7e-4a53-9d55-0f8e1c1e0a01"
        name = "rx0"
        rx_chans = 2
        max_sample_rate = 61440000
        min_freq = 70000000
        max_freq = 6000000000

        [[resource]]
        uuid = "4b1f6c0e-2f7e-4a53-9d55-0f8e1c1e0a02"
        name = "tx0"
        tx_chans = 1
    "#;

    #[test]
    fn test_load_and_find() {
        let list = ResourceList::from_toml(SAMPLE).expect("valid resources");
        assert_eq!(list.len(), 2);

        let uuid = Uuid::parse_str("4b1f6c0e-2f7e-4a53-9d55-0f8e1c1e0a02").expect("uuid");
        let tx = list.find(&uuid).expect("tx0 present");
        assert_eq!(tx.name, "tx0");
        assert_eq!(tx.tx_chans, 1);
        assert!(list.find(&Uuid::nil()).is_none());
    }

    #[test]
    fn test_duplicate_uuid_rejected() {
        let doubled = format!("{SAMPLE}\n[[resource]]\nuuid = \"4b1f6c0e-2f7e-4a53-9d55-0f8e1c1e0a01\"\nname = \"again\"\n");
        assert!(matches!(
            ResourceList::from_toml(&doubled),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_wire_layout() {
        let list = ResourceList::from_toml(SAMPLE).expect("valid resources");
        let rx = list.iter().next().expect("rx0").clone();

        let mut m: Mbuf = Mbuf::alloc(RESOURCE_WORDS * 4);
        rx.encode(&mut m).expect("encode");
        assert_eq!(m.len(), RESOURCE_WORDS * 4);
        assert_eq!(&m.payload()[32..36], &[0, 2, 0, 0]);

        m.rewind();
        assert_eq!(Resource::decode(&mut m).expect("decode"), rx);
    }

    #[test]
    fn test_long_name_truncated_on_wire() {
        let resource = Resource::new(Uuid::nil(), "a-very-long-resource-name");
        let mut m: Mbuf = Mbuf::alloc(64);
        resource.encode(&mut m).expect("encode");
        m.rewind();
        assert_eq!(Resource::decode(&mut m).expect("decode").name, "a-very-long-reso");
    }
}
