//! # DIR-24-8 Forwarding Table
//!
//! ## Purpose
//!
//! The forwarding information base of the router: a two-level direct
//! lookup structure giving O(1) worst-case longest-prefix match for IPv4
//! routes of any length (Gupta, Lin, McKeown).
//!
//! ## How it works
//!
//! TBL24 has one 16-bit entry per possible /24 prefix. Bit 15 is the
//! indicator: clear means the low bits hold a next-hop id directly, set
//! means they index a 256-entry TBLlong block that resolves the last
//! eight address bits. Next-hop ids are 8-bit handles into the next-hop
//! map; id 0 is the "no route" sentinel.
//!
//! The build consumes the route list in its sorted order (shortest prefix
//! first, ties in insertion order). Routes up to /24 range-fill TBL24;
//! longer routes split their covering /24 into a TBLlong block that is
//! pre-filled with the hop id the /24 held before, so the less specific
//! route keeps covering the rest of the block. A /24 that is already
//! split reuses its block. Because of the ordering, overwriting in place
//! is always the longest-prefix-correct thing to do.
//!
//! The table is built exactly once and immutable afterwards; workers hold
//! read-only handles and the lookup neither blocks nor allocates.
//!
//! ## Main components
//!
//! - `Fib::build()`: hop-id allocation plus the two-level fill.
//! - `Fib::lookup()`: the per-packet query.
//! - `Tbl24Entry`: the bit-packed first-level entry.

use crate::error::SetupError;
use crate::net::MacAddr;
use crate::routes::RouteList;

/// Number of first-level entries, one per /24 of the address space.
const TBL24_LEN: usize = 1 << 24;
/// Upper bound of second-level blocks, as recommended by the paper.
pub const TBLLONG_MAX_BLOCKS: usize = 4096;
/// Entries per TBLlong block, one per value of the last address byte.
const BLOCK_LEN: usize = 256;
/// Initial capacity of the next-hop map.
const INIT_NO_NXT_HOPS: usize = 20;

/// A first-level entry: bit 15 = indicator, bits 14..0 = index.
///
/// Indicator clear: the index is a next-hop id (0 = no route).
/// Indicator set: the index selects a TBLlong block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tbl24Entry(u16);

impl Tbl24Entry {
    const INDICATOR: u16 = 1 << 15;
    const NO_ROUTE: Tbl24Entry = Tbl24Entry(0);

    #[inline]
    fn next_hop(id: u8) -> Self {
        Tbl24Entry(id as u16)
    }

    #[inline]
    fn block(index: u16) -> Self {
        debug_assert!(index < Self::INDICATOR);
        Tbl24Entry(Self::INDICATOR | index)
    }

    #[inline]
    fn is_block(self) -> bool {
        self.0 & Self::INDICATOR != 0
    }

    #[inline]
    fn index(self) -> u16 {
        self.0 & !Self::INDICATOR
    }
}

/// Forwarding information of one next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHop {
    /// Egress port.
    pub port: u8,
    /// MAC address of the neighbor behind that port.
    pub mac: MacAddr,
}

/// The built, immutable lookup structure.
pub struct Fib {
    tbl24: Box<[Tbl24Entry]>,
    tbllong: Vec<u8>,
    next_hops: Vec<NextHop>,
}

impl Fib {
    /// Builds the table from the sorted route list, consuming it.
    pub fn build(mut routes: RouteList) -> Result<Fib, SetupError> {
        let next_hops = alloc_hop_ids(&mut routes)?;
        let mut tbl24 = vec![Tbl24Entry::NO_ROUTE; TBL24_LEN].into_boxed_slice();
        let mut tbllong: Vec<u8> = Vec::new();

        for route in routes.routes() {
            let span = !route.mask;
            if route.prefix <= 24 {
                let first = (route.net >> 8) as usize;
                let last = ((route.net + span) >> 8) as usize;
                for entry in &mut tbl24[first..=last] {
                    *entry = Tbl24Entry::next_hop(route.hop_id);
                }
            } else {
                let slot = (route.net >> 8) as usize;
                let block = if tbl24[slot].is_block() {
                    // This /24 was split by an earlier route; keep its block.
                    tbl24[slot].index() as usize
                } else {
                    let block = tbllong.len() / BLOCK_LEN;
                    if block == TBLLONG_MAX_BLOCKS {
                        return Err(SetupError::TblLongCapacity);
                    }
                    // Seed the fresh block with whatever the /24 resolved
                    // to so far, so the covering route keeps matching the
                    // addresses this route does not claim.
                    let inherited = tbl24[slot].index() as u8;
                    tbllong.resize(tbllong.len() + BLOCK_LEN, inherited);
                    tbl24[slot] = Tbl24Entry::block(block as u16);
                    block
                };
                let lo = (route.net & 0xFF) as usize;
                let hi = lo + (span & 0xFF) as usize;
                for entry in &mut tbllong[block * BLOCK_LEN + lo..=block * BLOCK_LEN + hi] {
                    *entry = route.hop_id;
                }
            }
        }

        log::info!(
            "built DIR-24-8 tables: {} routes, {} next hops, {} TBLlong blocks",
            routes.len(),
            next_hops.len() - 1,
            tbllong.len() / BLOCK_LEN,
        );
        Ok(Fib {
            tbl24,
            tbllong,
            next_hops,
        })
    }

    /// Looks up the next hop of `dst`, given in host byte order.
    ///
    /// Callers holding a wire-format address must convert first. Returns
    /// `None` when no route covers the address.
    #[inline]
    pub fn lookup(&self, dst: u32) -> Option<&NextHop> {
        let entry = self.tbl24[(dst >> 8) as usize];
        let id = if entry.is_block() {
            self.tbllong[entry.index() as usize * BLOCK_LEN + (dst & 0xFF) as usize]
        } else {
            entry.index() as u8
        };
        if id == 0 {
            None
        } else {
            Some(&self.next_hops[id as usize])
        }
    }

    /// Number of allocated TBLlong blocks.
    pub fn tbllong_blocks(&self) -> usize {
        self.tbllong.len() / BLOCK_LEN
    }

    /// Number of distinct next hops (the sentinel not counted).
    pub fn next_hop_count(&self) -> usize {
        self.next_hops.len() - 1
    }
}

/// Assigns every route its 8-bit next-hop id and returns the id-indexed
/// next-hop map. Routes sharing `(port, mac)` share an id; id 0 stays
/// reserved as the "no route" sentinel.
fn alloc_hop_ids(routes: &mut RouteList) -> Result<Vec<NextHop>, SetupError> {
    let mut next_hops = Vec::with_capacity(INIT_NO_NXT_HOPS);
    next_hops.push(NextHop {
        port: 0,
        mac: MacAddr::ZERO,
    });
    for route in routes.routes_mut() {
        let hop = NextHop {
            port: route.port,
            mac: route.mac,
        };
        match next_hops[1..].iter().position(|known| *known == hop) {
            Some(at) => route.hop_id = (at + 1) as u8,
            None => {
                if next_hops.len() > u8::MAX as usize {
                    return Err(SetupError::NextHopCapacity);
                }
                route.hop_id = next_hops.len() as u8;
                next_hops.push(hop);
                log::debug!("next hop {}: port {} via {}", route.hop_id, hop.port, hop.mac);
            }
        }
    }
    Ok(next_hops)
}
