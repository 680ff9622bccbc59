/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! The fabric table: one entry per unit of administrative trust the
//! device has been commissioned into. Each entry carries the operational
//! credential chain, the operational signing key and the fabric-wide
//! identity protection key, and answers the destination-identifier and
//! credential-verification questions the handshake asks.

use core::num::NonZeroU8;

use log::error;

use crate::cert::{Cert, ValidationContext, MAX_CERT_TLV_LEN};
use crate::crypto::{self, HmacSha256, KeyPair};
use crate::error::{Error, ErrorCode};
use heapless::Vec;

/// Max number of supported fabrics
pub const MAX_SUPPORTED_FABRICS: usize = 3;

pub const IPK_LEN_BYTES: usize = crypto::SYMM_KEY_LEN_BYTES;

/// Fabric type
pub struct Fabric {
    /// Fabric local index
    fab_idx: NonZeroU8,
    /// Fabric node ID
    node_id: u64,
    /// Fabric ID
    fabric_id: u64,
    /// Operational key pair
    key_pair: KeyPair,
    /// Root CA certificate in encoded TLV form
    root_ca: Vec<u8, { MAX_CERT_TLV_LEN }>,
    /// Intermediate CA certificate; empty when the NOC chains directly to
    /// the root
    icac: Vec<u8, { MAX_CERT_TLV_LEN }>,
    /// Node Operational Certificate
    noc: Vec<u8, { MAX_CERT_TLV_LEN }>,
    /// Root CA public key, cached at commissioning time
    root_pubkey: [u8; crypto::EC_POINT_LEN_BYTES],
    /// Identity Protection Key
    ipk: [u8; IPK_LEN_BYTES],
}

impl Fabric {
    fn new(
        fab_idx: NonZeroU8,
        key_pair: KeyPair,
        root_ca: &[u8],
        noc: &[u8],
        icac: &[u8],
        ipk: &[u8],
    ) -> Result<Self, Error> {
        if ipk.len() != IPK_LEN_BYTES {
            Err(ErrorCode::InvalidArgument)?;
        }

        let noc_p = Cert::new(noc)?;
        let node_id = noc_p.get_node_id()?;
        let fabric_id = noc_p.get_fabric_id()?;

        let root_p = Cert::new(root_ca)?;
        let mut root_pubkey = [0; crypto::EC_POINT_LEN_BYTES];
        root_pubkey.copy_from_slice(root_p.get_pubkey());

        let mut fabric = Self {
            fab_idx,
            node_id,
            fabric_id,
            key_pair,
            root_ca: Vec::new(),
            icac: Vec::new(),
            noc: Vec::new(),
            root_pubkey,
            ipk: [0; IPK_LEN_BYTES],
        };

        fabric
            .root_ca
            .extend_from_slice(root_ca)
            .map_err(|_| ErrorCode::NoSpace)?;
        fabric
            .icac
            .extend_from_slice(icac)
            .map_err(|_| ErrorCode::NoSpace)?;
        fabric
            .noc
            .extend_from_slice(noc)
            .map_err(|_| ErrorCode::NoSpace)?;
        fabric.ipk.copy_from_slice(ipk);

        Ok(fabric)
    }

    /// Compute the destination identifier binding this fabric, the given
    /// initiator random and the given node id
    pub fn generate_dest_id(
        &self,
        random: &[u8],
        node_id: u64,
        out: &mut [u8],
    ) -> Result<(), Error> {
        let mut mac = HmacSha256::new(&self.ipk)?;

        mac.update(random)?;
        mac.update(&self.root_pubkey)?;
        mac.update(&self.fabric_id.to_le_bytes())?;
        mac.update(&node_id.to_le_bytes())?;

        mac.finish(out)
    }

    /// Is the fabric matching the provided destination ID
    pub fn is_dest_id(&self, random: &[u8], target: &[u8]) -> Result<(), Error> {
        let mut id = [0; crypto::SHA256_HASH_LEN_BYTES];
        self.generate_dest_id(random, self.node_id, &mut id)?;

        if id.as_slice() == target {
            Ok(())
        } else {
            Err(ErrorCode::KeyNotFound.into())
        }
    }

    /// Verify a peer's operational credential chain against this fabric's
    /// trusted root and extract the peer's identity.
    ///
    /// Returns `(peer_node_id, fabric_id, peer_public_key)`.
    pub fn verify_credentials(
        &self,
        noc: &[u8],
        icac: Option<&[u8]>,
        ctx: &ValidationContext,
    ) -> Result<(u64, u64, [u8; crypto::EC_POINT_LEN_BYTES]), Error> {
        let noc_cert = Cert::new(noc).map_err(Error::map_case_parameter)?;
        let icac_cert = match icac {
            Some(icac) => Some(Cert::new(icac).map_err(Error::map_case_parameter)?),
            None => None,
        };
        let root_cert = Cert::new(self.root_ca())?;

        self.verify_chain(&noc_cert, icac_cert.as_ref(), &root_cert, ctx)
            .map_err(Error::map_no_shared_root)?;

        let node_id = noc_cert.get_node_id().map_err(Error::map_no_shared_root)?;
        let mut pubkey = [0; crypto::EC_POINT_LEN_BYTES];
        pubkey.copy_from_slice(noc_cert.get_pubkey());

        Ok((node_id, self.fabric_id, pubkey))
    }

    fn verify_chain(
        &self,
        noc: &Cert,
        icac: Option<&Cert>,
        root: &Cert,
        ctx: &ValidationContext,
    ) -> Result<(), Error> {
        if self.fabric_id != noc.get_fabric_id()? {
            error!("NOC fabric id does not match our fabric");
            Err(ErrorCode::InvalidData)?;
        }

        noc.check_validity(ctx.effective_time)?;

        if (noc.key_usage() & ctx.required_key_usage) != ctx.required_key_usage
            || (noc.ext_key_usage() & ctx.required_ext_key_usage) != ctx.required_ext_key_usage
        {
            error!("NOC key usage does not satisfy the validation context");
            Err(ErrorCode::InvalidData)?;
        }

        let mut verifier = noc.verify_chain_start();

        if let Some(icac) = icac {
            // If ICAC is present handle it
            if let Ok(fid) = icac.get_fabric_id() {
                if fid != self.fabric_id {
                    Err(ErrorCode::InvalidData)?;
                }
            }
            icac.check_validity(ctx.effective_time)?;
            verifier = verifier.add_cert(icac)?;
        }

        verifier.add_cert(root)?.finalise()?;

        Ok(())
    }

    /// Sign a message with the fabric's operational key pair
    pub fn sign_msg(&self, msg: &[u8], signature: &mut [u8]) -> Result<usize, Error> {
        self.key_pair.sign_msg(msg, signature)
    }

    /// Return the fabric's node ID
    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Return the fabric's fabric ID
    pub fn fabric_id(&self) -> u64 {
        self.fabric_id
    }

    /// Return the fabric's local index
    pub fn fab_idx(&self) -> NonZeroU8 {
        self.fab_idx
    }

    /// Return the fabric's Root CA in encoded TLV form
    pub fn root_ca(&self) -> &[u8] {
        &self.root_ca
    }

    /// Return the fabric's ICAC in encoded TLV form; an empty slice means
    /// this fabric has no ICAC
    pub fn icac(&self) -> &[u8] {
        &self.icac
    }

    /// Return the fabric's NOC in encoded TLV form
    pub fn noc(&self) -> &[u8] {
        &self.noc
    }

    /// Return the fabric's IPK
    pub fn ipk(&self) -> &[u8; IPK_LEN_BYTES] {
        &self.ipk
    }
}

/// Fabric table type
pub struct FabricTable {
    fabrics: Vec<Fabric, MAX_SUPPORTED_FABRICS>,
}

impl Default for FabricTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FabricTable {
    /// Create a new Fabric Table
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            fabrics: Vec::new(),
        }
    }

    /// Add a new fabric with the provided credentials.
    ///
    /// If this operation succeeds, the fabric immediately becomes
    /// operational; its assigned local index is returned.
    pub fn add(
        &mut self,
        key_pair: KeyPair,
        root_ca: &[u8],
        noc: &[u8],
        icac: &[u8],
        ipk: &[u8],
    ) -> Result<NonZeroU8, Error> {
        let max_fab_idx = self
            .iter()
            .map(|fabric| fabric.fab_idx().get())
            .max()
            .unwrap_or(0);
        if max_fab_idx >= u8::MAX - 1 {
            Err(ErrorCode::NoSpace)?;
        }
        // We never use 0 as a fabric index
        let fab_idx = NonZeroU8::new(max_fab_idx + 1).ok_or(ErrorCode::NoSpace)?;

        let fabric = Fabric::new(fab_idx, key_pair, root_ca, noc, icac, ipk)?;
        self.fabrics.push(fabric).map_err(|_| ErrorCode::NoSpace)?;

        Ok(fab_idx)
    }

    /// Remove a fabric from the table
    pub fn remove(&mut self, fab_idx: NonZeroU8) {
        self.fabrics.retain(|fabric| fabric.fab_idx != fab_idx);
    }

    /// Get a fabric that matches the provided destination ID
    pub fn find_destination_id_candidate(
        &self,
        dest_id: &[u8],
        random: &[u8],
    ) -> Option<NonZeroU8> {
        self.iter()
            .find(|fabric| fabric.is_dest_id(random, dest_id).is_ok())
            .map(|fabric| fabric.fab_idx())
    }

    /// Get a fabric by its local index
    pub fn get(&self, fab_idx: NonZeroU8) -> Option<&Fabric> {
        self.iter().find(|fabric| fabric.fab_idx == fab_idx)
    }

    /// Iterate over the fabrics
    pub fn iter(&self) -> impl Iterator<Item = &Fabric> {
        self.fabrics.iter()
    }
}
