//! Key derivation engines: AES-KDF rounds and Argon2 (d/id).
//!
//! Parameters travel as a [`VariantDictionary`] tagged with the engine
//! UUID under `$UUID`, exactly as stored in a KDBX 4 header field.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::{uuid, Uuid};
use zeroize::Zeroize;

use crate::crypto::sha256;
use crate::error::{Error, Result};
use crate::variant_dictionary::VariantDictionary;

pub const AES_KDF_UUID: Uuid = uuid!("c9d9f39a-628a-4460-bf74-0d08c18a4fea");
pub const ARGON2D_UUID: Uuid = uuid!("ef636ddf-8c29-444b-91f7-a9a403e30a0c");
pub const ARGON2ID_UUID: Uuid = uuid!("9e298b19-56db-4773-b23d-fc3ec6f0a1e6");

const PARAM_UUID: &str = "$UUID";

// AES-KDF parameter names
const PARAM_SEED: &str = "S";
const PARAM_ROUNDS: &str = "R";

// Argon2 parameter names
const PARAM_SALT: &str = "S";
const PARAM_PARALLELISM: &str = "P";
const PARAM_MEMORY: &str = "M";
const PARAM_ITERATIONS: &str = "I";
const PARAM_VERSION: &str = "V";

const DEFAULT_AES_ROUNDS: u64 = 100_000;

const ARGON2_DEFAULT_ITERATIONS: u64 = 3;
const ARGON2_MIN_ITERATIONS: u64 = 1;
const ARGON2_MAX_ITERATIONS: u64 = u32::MAX as u64;

/// Memory is stored in the dictionary as raw bytes; the argon2 primitive
/// takes KiB blocks, converted at that boundary only.
const ARGON2_MEMORY_BLOCK_SIZE: u64 = 1024;
const ARGON2_DEFAULT_MEMORY: u64 = 1024 * 1024 * 16; // 16 MiB
const ARGON2_MIN_MEMORY: u64 = 1024 * 8;
const ARGON2_MAX_MEMORY: u64 = u32::MAX as u64;

const ARGON2_DEFAULT_PARALLELISM: u32 = 4;
const ARGON2_MIN_PARALLELISM: u32 = 1;
const ARGON2_MAX_PARALLELISM: u32 = (1 << 24) - 1;

const ARGON2_MIN_VERSION: u32 = 0x10;
const ARGON2_MAX_VERSION: u32 = 0x13;

/// KDF parameters: a variant dictionary plus the engine UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParameters {
    dict: VariantDictionary,
}

impl KdfParameters {
    pub fn new(engine_uuid: Uuid) -> Self {
        let mut dict = VariantDictionary::new();
        dict.set_byte_array(PARAM_UUID, engine_uuid.as_bytes().to_vec());
        Self { dict }
    }

    /// The engine UUID this dictionary is tagged with.
    pub fn kdf_uuid(&self) -> Result<Uuid> {
        let bytes = self
            .dict
            .get_byte_array(PARAM_UUID)
            .ok_or_else(|| Error::Format("KDF parameters without $UUID".into()))?;
        Uuid::from_slice(bytes).map_err(|_| Error::Format("KDF $UUID is not 16 bytes".into()))
    }

    pub fn dictionary(&self) -> &VariantDictionary {
        &self.dict
    }

    pub fn dictionary_mut(&mut self) -> &mut VariantDictionary {
        &mut self.dict
    }

    /// The stored seed/salt bytes, when this is an AES-KDF parameter
    /// set. Version 3 headers spell the seed out as its own field.
    pub fn aes_seed(&self) -> Option<Vec<u8>> {
        if self.kdf_uuid().ok()? != AES_KDF_UUID {
            return None;
        }
        self.dict.get_byte_array(PARAM_SEED).map(<[u8]>::to_vec)
    }

    /// Store a legacy transform seed; only valid on AES-KDF parameters.
    pub fn set_aes_seed(&mut self, seed: Vec<u8>) -> Result<()> {
        if self.kdf_uuid()? != AES_KDF_UUID {
            return Err(Error::KdfParameter(
                "transform seed only applies to the AES KDF".into(),
            ));
        }
        self.dict.set_byte_array(PARAM_SEED, seed);
        Ok(())
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.dict.serialize()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let dict = VariantDictionary::deserialize(data)?;
        let params = Self { dict };
        params.kdf_uuid()?;
        Ok(params)
    }
}

/// The Argon2 variant, distinguished by engine UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argon2Variant {
    Argon2d,
    Argon2id,
}

/// A key derivation engine. Stretches the 32-byte composite key into the
/// 32-byte transformed key mixed into the final cipher key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfEngine {
    /// Sequential AES-256 single-block encryption rounds. CPU-bound,
    /// no memory cost, deterministic for a fixed seed and round count.
    Aes,
    /// Memory-hard Argon2, d or id variant.
    Argon2(Argon2Variant),
}

impl KdfEngine {
    /// Resolve the engine for a loaded parameter set. Unknown UUIDs are
    /// fatal at load time.
    pub fn from_parameters(params: &KdfParameters) -> Result<Self> {
        Self::from_uuid(params.kdf_uuid()?)
    }

    pub fn from_uuid(uuid: Uuid) -> Result<Self> {
        match uuid {
            AES_KDF_UUID => Ok(KdfEngine::Aes),
            ARGON2D_UUID => Ok(KdfEngine::Argon2(Argon2Variant::Argon2d)),
            ARGON2ID_UUID => Ok(KdfEngine::Argon2(Argon2Variant::Argon2id)),
            other => Err(Error::UnknownKdf(other)),
        }
    }

    pub fn uuid(self) -> Uuid {
        match self {
            KdfEngine::Aes => AES_KDF_UUID,
            KdfEngine::Argon2(Argon2Variant::Argon2d) => ARGON2D_UUID,
            KdfEngine::Argon2(Argon2Variant::Argon2id) => ARGON2ID_UUID,
        }
    }

    /// Fresh parameters with this engine's defaults and no seed/salt yet;
    /// call [`KdfEngine::randomize`] before use.
    pub fn default_parameters(self) -> KdfParameters {
        let mut params = KdfParameters::new(self.uuid());
        match self {
            KdfEngine::Aes => {
                params.dict.set_u64(PARAM_ROUNDS, DEFAULT_AES_ROUNDS);
            }
            KdfEngine::Argon2(_) => {
                params
                    .dict
                    .set_u32(PARAM_PARALLELISM, ARGON2_DEFAULT_PARALLELISM);
                params.dict.set_u64(PARAM_MEMORY, ARGON2_DEFAULT_MEMORY);
                params
                    .dict
                    .set_u64(PARAM_ITERATIONS, ARGON2_DEFAULT_ITERATIONS);
                params.dict.set_u32(PARAM_VERSION, ARGON2_MAX_VERSION);
            }
        }
        params
    }

    /// Fill a fresh random 32-byte seed (AES) or salt (Argon2).
    pub fn randomize(self, params: &mut KdfParameters) {
        let mut salt = [0u8; 32];
        OsRng.fill_bytes(&mut salt);
        match self {
            KdfEngine::Aes => params.dict.set_byte_array(PARAM_SEED, salt.to_vec()),
            KdfEngine::Argon2(_) => params.dict.set_byte_array(PARAM_SALT, salt.to_vec()),
        }
    }

    /// Stretch `master_key` into the 32-byte transformed key.
    pub fn transform(self, master_key: &[u8], params: &KdfParameters) -> Result<[u8; 32]> {
        match self {
            KdfEngine::Aes => {
                let seed = params
                    .dict
                    .get_byte_array(PARAM_SEED)
                    .ok_or_else(|| Error::Format("AES-KDF parameters without seed".into()))?;
                let rounds = params.dict.get_u64(PARAM_ROUNDS).unwrap_or(DEFAULT_AES_ROUNDS);
                transform_aes_kdf(master_key, seed, rounds)
            }
            KdfEngine::Argon2(variant) => {
                let salt = params.dict.get_byte_array(PARAM_SALT).unwrap_or(&[]);
                let parallelism = params
                    .dict
                    .get_u32(PARAM_PARALLELISM)
                    .unwrap_or(ARGON2_DEFAULT_PARALLELISM);
                let memory = params
                    .dict
                    .get_u64(PARAM_MEMORY)
                    .unwrap_or(ARGON2_DEFAULT_MEMORY);
                let iterations = params
                    .dict
                    .get_u64(PARAM_ITERATIONS)
                    .unwrap_or(ARGON2_DEFAULT_ITERATIONS);
                let version = params
                    .dict
                    .get_u32(PARAM_VERSION)
                    .unwrap_or(ARGON2_MAX_VERSION);
                check_bounds("iterations", iterations, ARGON2_MIN_ITERATIONS, ARGON2_MAX_ITERATIONS)?;
                check_bounds("memory", memory, ARGON2_MIN_MEMORY, ARGON2_MAX_MEMORY)?;
                check_bounds(
                    "parallelism",
                    parallelism as u64,
                    ARGON2_MIN_PARALLELISM as u64,
                    ARGON2_MAX_PARALLELISM as u64,
                )?;
                check_bounds(
                    "version",
                    version as u64,
                    ARGON2_MIN_VERSION as u64,
                    ARGON2_MAX_VERSION as u64,
                )?;
                transform_argon2(
                    variant,
                    master_key,
                    salt,
                    parallelism,
                    memory / ARGON2_MEMORY_BLOCK_SIZE,
                    iterations,
                    version,
                )
            }
        }
    }

    pub fn key_rounds(self, params: &KdfParameters) -> u64 {
        match self {
            KdfEngine::Aes => params.dict.get_u64(PARAM_ROUNDS).unwrap_or(DEFAULT_AES_ROUNDS),
            KdfEngine::Argon2(_) => params
                .dict
                .get_u64(PARAM_ITERATIONS)
                .unwrap_or(ARGON2_DEFAULT_ITERATIONS),
        }
    }

    /// Bounds are checked here, not clamped: an out-of-range value is an
    /// error the caller must see.
    pub fn set_key_rounds(self, params: &mut KdfParameters, rounds: u64) -> Result<()> {
        match self {
            KdfEngine::Aes => {
                check_bounds("rounds", rounds, 1, u64::MAX)?;
                params.dict.set_u64(PARAM_ROUNDS, rounds);
            }
            KdfEngine::Argon2(_) => {
                check_bounds("iterations", rounds, ARGON2_MIN_ITERATIONS, ARGON2_MAX_ITERATIONS)?;
                params.dict.set_u64(PARAM_ITERATIONS, rounds);
            }
        }
        Ok(())
    }

    /// Memory usage in bytes; only meaningful for Argon2.
    pub fn memory_usage(self, params: &KdfParameters) -> Option<u64> {
        match self {
            KdfEngine::Aes => None,
            KdfEngine::Argon2(_) => Some(
                params
                    .dict
                    .get_u64(PARAM_MEMORY)
                    .unwrap_or(ARGON2_DEFAULT_MEMORY),
            ),
        }
    }

    pub fn set_memory_usage(self, params: &mut KdfParameters, memory: u64) -> Result<()> {
        match self {
            KdfEngine::Aes => Err(Error::KdfParameter(
                "AES-KDF has no memory parameter".into(),
            )),
            KdfEngine::Argon2(_) => {
                check_bounds("memory", memory, ARGON2_MIN_MEMORY, ARGON2_MAX_MEMORY)?;
                params.dict.set_u64(PARAM_MEMORY, memory);
                Ok(())
            }
        }
    }

    pub fn parallelism(self, params: &KdfParameters) -> Option<u32> {
        match self {
            KdfEngine::Aes => None,
            KdfEngine::Argon2(_) => Some(
                params
                    .dict
                    .get_u32(PARAM_PARALLELISM)
                    .unwrap_or(ARGON2_DEFAULT_PARALLELISM),
            ),
        }
    }

    pub fn set_parallelism(self, params: &mut KdfParameters, parallelism: u32) -> Result<()> {
        match self {
            KdfEngine::Aes => Err(Error::KdfParameter(
                "AES-KDF has no parallelism parameter".into(),
            )),
            KdfEngine::Argon2(_) => {
                check_bounds(
                    "parallelism",
                    parallelism as u64,
                    ARGON2_MIN_PARALLELISM as u64,
                    ARGON2_MAX_PARALLELISM as u64,
                )?;
                params.dict.set_u32(PARAM_PARALLELISM, parallelism);
                Ok(())
            }
        }
    }
}

fn check_bounds(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(Error::KdfParameter(format!(
            "{name} = {value} outside [{min}, {max}]"
        )));
    }
    Ok(())
}

fn transform_aes_kdf(master_key: &[u8], seed: &[u8], rounds: u64) -> Result<[u8; 32]> {
    // Both the key material and the seed are normalized to 32 bytes.
    let mut key = if master_key.len() == 32 {
        let mut k = [0u8; 32];
        k.copy_from_slice(master_key);
        k
    } else {
        sha256(master_key)
    };
    let seed32 = if seed.len() == 32 {
        let mut s = [0u8; 32];
        s.copy_from_slice(seed);
        s
    } else {
        sha256(seed)
    };

    let cipher =
        Aes256::new_from_slice(&seed32).map_err(|e| Error::Crypto(e.to_string()))?;
    for _ in 0..rounds {
        let (left, right) = key.split_at_mut(16);
        cipher.encrypt_block(GenericArray::from_mut_slice(left));
        cipher.encrypt_block(GenericArray::from_mut_slice(right));
    }
    let out = sha256(&key);
    key.zeroize();
    Ok(out)
}

fn transform_argon2(
    variant: Argon2Variant,
    master_key: &[u8],
    salt: &[u8],
    parallelism: u32,
    memory_blocks: u64,
    iterations: u64,
    version: u32,
) -> Result<[u8; 32]> {
    let algorithm = match variant {
        Argon2Variant::Argon2d => Algorithm::Argon2d,
        Argon2Variant::Argon2id => Algorithm::Argon2id,
    };
    let version = Version::try_from(version).map_err(|e| Error::Crypto(e.to_string()))?;
    let params = Params::new(
        memory_blocks as u32,
        iterations as u32,
        parallelism,
        Some(32),
    )
    .map_err(|e| Error::KdfParameter(e.to_string()))?;

    let mut out = [0u8; 32];
    Argon2::new(algorithm, version, params)
        .hash_password_into(master_key, salt, &mut out)
        .map_err(|e| Error::Crypto(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aes_params(rounds: u64, seed: [u8; 32]) -> KdfParameters {
        let mut params = KdfEngine::Aes.default_parameters();
        KdfEngine::Aes.set_key_rounds(&mut params, rounds).unwrap();
        params.dictionary_mut().set_byte_array("S", seed.to_vec());
        params
    }

    fn argon2_params(memory: u64, iterations: u64, parallelism: u32) -> KdfParameters {
        let engine = KdfEngine::Argon2(Argon2Variant::Argon2id);
        let mut params = engine.default_parameters();
        engine.set_memory_usage(&mut params, memory).unwrap();
        engine.set_key_rounds(&mut params, iterations).unwrap();
        engine.set_parallelism(&mut params, parallelism).unwrap();
        params
            .dictionary_mut()
            .set_byte_array("S", vec![0x5A; 32]);
        params
    }

    #[test]
    fn aes_kdf_is_deterministic() {
        let params = aes_params(64, [9u8; 32]);
        let a = KdfEngine::Aes.transform(&[1u8; 32], &params).unwrap();
        let b = KdfEngine::Aes.transform(&[1u8; 32], &params).unwrap();
        assert_eq!(a, b);
        let c = KdfEngine::Aes.transform(&[2u8; 32], &params).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn randomize_never_repeats_seed() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let mut params = KdfEngine::Aes.default_parameters();
            KdfEngine::Aes.randomize(&mut params);
            let seed = params.dictionary().get_byte_array("S").unwrap().to_vec();
            assert!(seen.insert(seed), "seed collision across randomize calls");
        }
    }

    #[test]
    fn argon2_every_parameter_changes_output() {
        let engine = KdfEngine::Argon2(Argon2Variant::Argon2id);
        let key = [7u8; 32];
        let base = engine.transform(&key, &argon2_params(1024 * 8, 1, 1)).unwrap();
        let more_memory = engine.transform(&key, &argon2_params(1024 * 16, 1, 1)).unwrap();
        let more_iterations = engine.transform(&key, &argon2_params(1024 * 8, 2, 1)).unwrap();
        let more_lanes = engine.transform(&key, &argon2_params(1024 * 16, 1, 2)).unwrap();
        assert_ne!(base, more_memory);
        assert_ne!(base, more_iterations);
        assert_ne!(more_memory, more_lanes);
    }

    #[test]
    fn argon2d_and_argon2id_differ() {
        let key = [7u8; 32];
        let mut params = argon2_params(1024 * 8, 1, 1);
        let id = KdfEngine::Argon2(Argon2Variant::Argon2id)
            .transform(&key, &params)
            .unwrap();
        // Retag the same parameters with the Argon2d UUID
        params
            .dictionary_mut()
            .set_byte_array("$UUID", ARGON2D_UUID.as_bytes().to_vec());
        let d = KdfEngine::Argon2(Argon2Variant::Argon2d)
            .transform(&key, &params)
            .unwrap();
        assert_ne!(id, d);
    }

    #[test]
    fn out_of_bounds_parameters_are_rejected_before_transform() {
        let engine = KdfEngine::Argon2(Argon2Variant::Argon2id);
        let mut params = engine.default_parameters();
        assert!(matches!(
            engine.set_memory_usage(&mut params, 1024),
            Err(Error::KdfParameter(_))
        ));
        assert!(matches!(
            engine.set_parallelism(&mut params, 0),
            Err(Error::KdfParameter(_))
        ));
        assert!(matches!(
            engine.set_key_rounds(&mut params, 0),
            Err(Error::KdfParameter(_))
        ));

        // A parameter smuggled past the setters still fails in transform
        params.dictionary_mut().set_u64("M", 16);
        assert!(matches!(
            engine.transform(&[0u8; 32], &params),
            Err(Error::KdfParameter(_))
        ));
    }

    #[test]
    fn unknown_kdf_uuid_is_fatal() {
        let params = KdfParameters::new(Uuid::new_v4());
        assert!(matches!(
            KdfEngine::from_parameters(&params),
            Err(Error::UnknownKdf(_))
        ));
    }

    #[test]
    fn parameters_roundtrip_through_wire_form() {
        let params = argon2_params(1024 * 8, 2, 2);
        let parsed = KdfParameters::deserialize(&params.serialize()).unwrap();
        assert_eq!(params, parsed);
        assert_eq!(parsed.kdf_uuid().unwrap(), ARGON2ID_UUID);
    }
}
