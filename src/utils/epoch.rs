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

use core::time::Duration;

pub type Epoch = fn() -> Duration;

/// Seconds from 1970/01/01 00:00:00 till 2000/01/01 00:00:00 UTC, the
/// epoch used in certificate validity fields
pub const CHIP_EPOCH_SECS: u64 = 946684800;

/// A Not-After value of 0 in a certificate means the certificate never
/// expires
pub const CERT_DOESNT_EXPIRE: u32 = 0;

pub fn dummy_epoch() -> Duration {
    Duration::from_secs(0)
}

#[cfg(feature = "std")]
pub fn sys_epoch() -> Duration {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
}

/// Convert a Unix timestamp to CHIP-epoch seconds, saturating at zero for
/// pre-epoch times
pub fn unix_to_chip_epoch_secs(unix_secs: u64) -> u32 {
    unix_secs.saturating_sub(CHIP_EPOCH_SECS).min(u32::MAX as u64) as u32
}
