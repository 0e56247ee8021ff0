//! Payload codecs for spore and cluster cells.
//!
//! A spore's content type follows the media type grammar
//! `type/subtype;key=value;...`. Two parameters carry protocol meaning:
//! `immortal=true` protects the spore from being melted, and
//! `mutant[]=<id>,<id>` lists the extension ids the spore opts into.

use std::fmt;

use crate::error::SporeError;
use crate::molecules::{self, ClusterDataV1, ClusterDataV2, SporeDataLayout};
use crate::types::Byte32;

const IMMORTAL_PARAM: &str = "immortal";
const MUTANT_PARAM: &str = "mutant[]";

fn utf8(bytes: Vec<u8>, what: &str) -> Result<String, SporeError> {
    String::from_utf8(bytes)
        .map_err(|err| SporeError::InvalidCellData(format!("{what} is not UTF-8: {err}")))
}

fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$&-^_.+".contains(&b))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    pub media_type: String,
    pub params: Vec<(String, String)>,
}

impl ContentType {
    pub fn parse(raw: &str) -> Result<Self, SporeError> {
        let mut parts = raw.split(';');
        let media_type = parts.next().unwrap_or_default().trim();

        let valid_media_type = media_type
            .split_once('/')
            .is_some_and(|(kind, subtype)| is_token(kind) && is_token(subtype));
        if !valid_media_type {
            return Err(SporeError::ContentType(format!(
                "invalid media type '{media_type}' in '{raw}'"
            )));
        }

        let mut params = Vec::new();
        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').ok_or_else(|| {
                SporeError::ContentType(format!("parameter '{part}' is missing '='"))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(SporeError::ContentType(format!(
                    "parameter '{part}' has an empty key"
                )));
            }
            params.push((key.to_ascii_lowercase(), value.trim().to_string()));
        }

        Ok(Self {
            media_type: media_type.to_ascii_lowercase(),
            params,
        })
    }

    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn is_immortal(&self) -> bool {
        self.param(IMMORTAL_PARAM)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }

    /// Extension ids listed in the `mutant[]` parameter.
    pub fn mutant_ids(&self) -> Result<Vec<Vec<u8>>, SporeError> {
        let Some(raw) = self.param(MUTANT_PARAM) else {
            return Ok(Vec::new());
        };

        raw.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| {
                hex::decode(id.strip_prefix("0x").unwrap_or(id)).map_err(|err| {
                    SporeError::ContentType(format!("invalid mutant id '{id}': {err}"))
                })
            })
            .collect()
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.media_type)?;
        for (key, value) in &self.params {
            write!(f, ";{key}={value}")?;
        }
        Ok(())
    }
}

/// Payload of a spore cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SporeData {
    pub content_type: String,
    pub content: Vec<u8>,
    pub cluster_id: Option<Byte32>,
}

impl SporeData {
    #[must_use]
    pub fn new(content_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            content,
            cluster_id: None,
        }
    }

    #[must_use]
    pub fn with_cluster_id(mut self, cluster_id: Byte32) -> Self {
        self.cluster_id = Some(cluster_id);
        self
    }

    pub fn parsed_content_type(&self) -> Result<ContentType, SporeError> {
        ContentType::parse(&self.content_type)
    }

    /// Whether the spore is protected from melting.
    ///
    /// A content type that fails to parse still counts when it literally names the
    /// flag, so an unvalidated spore cannot dodge the protection.
    #[must_use]
    pub fn is_immortal(&self) -> bool {
        match self.parsed_content_type() {
            Ok(content_type) => content_type.is_immortal(),
            Err(_) => self
                .content_type
                .to_ascii_lowercase()
                .replace(' ', "")
                .contains("immortal=true"),
        }
    }

    /// Reject malformed content types and empty content.
    pub fn validate(&self) -> Result<(), SporeError> {
        self.parsed_content_type()?.mutant_ids()?;
        if self.content.is_empty() {
            return Err(SporeError::InvalidCellData(
                "spore content must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pack(&self) -> Result<Vec<u8>, SporeError> {
        molecules::pack(&SporeDataLayout {
            content_type: self.content_type.as_bytes().to_vec(),
            content: self.content.clone(),
            cluster_id: self.cluster_id.map(|id| id.to_vec()),
        })
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, SporeError> {
        let layout: SporeDataLayout =
            molecules::unpack(bytes, "spore data", SporeError::InvalidCellData)?;

        let cluster_id = layout
            .cluster_id
            .map(|id| {
                Byte32::try_from(id.as_slice()).map_err(|_| {
                    SporeError::InvalidCellData(format!(
                        "spore cluster id must be 32 bytes, got {}",
                        id.len()
                    ))
                })
            })
            .transpose()?;

        Ok(Self {
            content_type: utf8(layout.content_type, "spore content type")?,
            content: layout.content,
            cluster_id,
        })
    }
}

/// Payload of a cluster cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterData {
    pub name: String,
    pub description: String,
    pub mutant_id: Option<Vec<u8>>,
}

impl ClusterData {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            mutant_id: None,
        }
    }

    pub fn pack(&self) -> Result<Vec<u8>, SporeError> {
        molecules::pack(&ClusterDataV2 {
            name: self.name.as_bytes().to_vec(),
            description: self.description.as_bytes().to_vec(),
            mutant_id: self.mutant_id.clone(),
        })
    }

    /// Decode either layout. Clusters minted before mutant support carry only
    /// a name and a description.
    pub fn unpack(bytes: &[u8]) -> Result<Self, SporeError> {
        let (name, description, mutant_id) =
            match molecules::unpack::<ClusterDataV2>(bytes, "cluster data", SporeError::InvalidCellData) {
                Ok(v2) => (v2.name, v2.description, v2.mutant_id),
                Err(v2_err) => {
                    let v1: ClusterDataV1 = molecules::unpack(bytes, "cluster data", SporeError::InvalidCellData)
                        .map_err(|_| v2_err)?;
                    (v1.name, v1.description, None)
                }
            };

        Ok(Self {
            name: utf8(name, "cluster name")?,
            description: utf8(description, "cluster description")?,
            mutant_id,
        })
    }

    /// Check that `spore` may be minted into this cluster.
    ///
    /// A cluster that requires an extension only accepts spores listing it in
    /// their `mutant[]` parameter.
    pub fn check_spore_policy(&self, spore: &SporeData) -> Result<(), SporeError> {
        let Some(required) = &self.mutant_id else {
            return Ok(());
        };

        let listed = spore.parsed_content_type()?.mutant_ids()?;
        if listed.iter().any(|id| id == required) {
            return Ok(());
        }

        Err(SporeError::PolicyViolation(format!(
            "cluster '{}' requires mutant 0x{} but the spore content type '{}' does not list it",
            self.name,
            hex::encode(required),
            spore.content_type
        )))
    }
}

/// Args of a mutant cell: the extension id, then an optional minimum payment
/// in shannons owed to the mutant's owner by every spore opting in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MutantArgs {
    pub id: Byte32,
    pub min_payment: Option<u64>,
}

impl MutantArgs {
    pub fn parse(args: &[u8]) -> Result<Self, SporeError> {
        let invalid = || {
            SporeError::InvalidCellData(format!(
                "mutant args must be 32 or 40 bytes, got {}",
                args.len()
            ))
        };
        let (id, rest) = args.split_first_chunk::<32>().ok_or_else(invalid)?;
        let min_payment = match rest.len() {
            0 => None,
            8 => {
                let mut amount = [0u8; 8];
                amount.copy_from_slice(rest);
                Some(u64::from_le_bytes(amount))
            }
            _ => return Err(invalid()),
        };
        Ok(Self { id: *id, min_payment })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_round_trips_through_display() {
        let parsed = ContentType::parse("Text/Plain; immortal=true ;charset=utf-8").expect("valid");
        assert_eq!(parsed.media_type, "text/plain");
        assert!(parsed.is_immortal());
        assert_eq!(parsed.param("charset"), Some("utf-8"));
        assert_eq!(parsed.to_string(), "text/plain;immortal=true;charset=utf-8");
    }

    #[test]
    fn content_type_rejects_bad_media_type() {
        for raw in ["", "text", "text/", "/plain", "te xt/plain", "text/plain;novalue"] {
            match ContentType::parse(raw) {
                Err(SporeError::ContentType(_)) => {}
                other => panic!("unexpected result for '{raw}': {other:?}"),
            }
        }
    }

    #[test]
    fn mutant_ids_accept_optional_prefix() {
        let parsed = ContentType::parse("image/png;mutant[]=0xaabb,ccdd").expect("valid");
        assert_eq!(
            parsed.mutant_ids().expect("hex ids"),
            vec![vec![0xAA, 0xBB], vec![0xCC, 0xDD]]
        );

        let bad = ContentType::parse("image/png;mutant[]=zz").expect("valid grammar");
        assert!(matches!(bad.mutant_ids(), Err(SporeError::ContentType(_))));
    }

    #[test]
    fn immortal_flag_survives_unparseable_content_type() {
        let spore = SporeData::new("not a media type; immortal = true", vec![1]);
        assert!(spore.is_immortal());
        assert!(!SporeData::new("text/plain", vec![1]).is_immortal());
    }

    #[test]
    fn spore_data_layout_is_recovered() {
        let data = SporeData::new("text/plain", b"hello".to_vec()).with_cluster_id([7; 32]);
        assert_eq!(SporeData::unpack(&data.pack().expect("packs")).expect("decodes"), data);

        let bare = SporeData::new("text/plain", vec![0]);
        assert_eq!(SporeData::unpack(&bare.pack().expect("packs")).expect("decodes"), bare);
    }

    #[test]
    fn spore_data_with_short_cluster_id_is_rejected() {
        let packed = molecules::pack(&SporeDataLayout {
            content_type: b"text/plain".to_vec(),
            content: b"x".to_vec(),
            cluster_id: Some(vec![1, 2, 3]),
        })
        .expect("packs");
        match SporeData::unpack(&packed) {
            Err(SporeError::InvalidCellData(message)) => assert!(message.contains("cluster id")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn empty_content_fails_validation() {
        let spore = SporeData::new("text/plain", Vec::new());
        assert!(matches!(spore.validate(), Err(SporeError::InvalidCellData(_))));
    }

    #[test]
    fn cluster_mutant_policy() {
        let mut cluster = ClusterData::new("gallery", "pictures");
        let plain = SporeData::new("image/png", vec![1]);
        cluster.check_spore_policy(&plain).expect("no requirement");

        cluster.mutant_id = Some(vec![0xAB; 32]);
        match cluster.check_spore_policy(&plain) {
            Err(SporeError::PolicyViolation(message)) => assert!(message.contains("gallery")),
            other => panic!("unexpected result: {other:?}"),
        }

        let opted_in = SporeData::new(format!("image/png;mutant[]={}", hex::encode([0xAB; 32])), vec![1]);
        cluster.check_spore_policy(&opted_in).expect("listed mutant");

        assert_eq!(ClusterData::unpack(&cluster.pack().expect("packs")).expect("decodes"), cluster);
    }

    #[test]
    fn mutant_args_carry_optional_min_payment() {
        let bare = MutantArgs::parse(&[7; 32]).expect("id only");
        assert_eq!(bare, MutantArgs { id: [7; 32], min_payment: None });

        let mut args = vec![7; 32];
        args.extend(1_000u64.to_le_bytes());
        assert_eq!(MutantArgs::parse(&args).expect("with payment").min_payment, Some(1_000));

        for len in [0, 31, 33, 41] {
            match MutantArgs::parse(&vec![7; len]) {
                Err(SporeError::InvalidCellData(message)) => assert!(message.contains(&len.to_string())),
                other => panic!("unexpected result for {len} bytes: {other:?}"),
            }
        }
    }

    #[test]
    fn two_field_cluster_has_no_mutant() {
        let packed = molecules::pack(&ClusterDataV1 {
            name: b"legacy".to_vec(),
            description: b"minted before mutants".to_vec(),
        })
        .expect("packs");

        let cluster = ClusterData::unpack(&packed).expect("decodes");
        assert_eq!(cluster, ClusterData::new("legacy", "minted before mutants"));
    }

    #[test]
    fn garbage_cluster_data_reports_the_current_layout() {
        match ClusterData::unpack(&[1, 2, 3]) {
            Err(SporeError::InvalidCellData(message)) => assert!(message.contains("cluster data")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
