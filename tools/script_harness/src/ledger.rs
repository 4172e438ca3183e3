//! A minimal simulation core: each company has a cash balance and can buy
//! tiles.

use std::collections::{BTreeMap, BTreeSet};

use script_bridge::{
    CommandCost, CommandDescriptor, CommandId, CommandPacket, CompanyId, CoreBackend, Dispatch,
    Money,
};
use serde::{Deserialize, Serialize};

pub const CMD_BUY_TILE: CommandId = CommandId(1);

/// Arguments of [`CMD_BUY_TILE`], bincode-encoded into the command payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyTile {
    pub tile: u32,
    pub price: i64,
}

impl BuyTile {
    pub fn descriptor(&self) -> anyhow::Result<CommandDescriptor> {
        Ok(CommandDescriptor::new(CMD_BUY_TILE, bincode::serialize(self)?))
    }
}

#[derive(Debug, Default)]
pub struct LedgerBackend {
    funds: BTreeMap<CompanyId, Money>,
    owned: BTreeSet<u32>,
}

impl LedgerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_funds(mut self, company: CompanyId, funds: Money) -> Self {
        self.funds.insert(company, funds);
        self
    }

    fn check(
        &self,
        command: CommandId,
        payload: &[u8],
        company: CompanyId,
    ) -> Result<BuyTile, String> {
        if command != CMD_BUY_TILE {
            return Err(format!("unknown command {}", command.0));
        }
        let args: BuyTile =
            bincode::deserialize(payload).map_err(|err| format!("malformed arguments: {err}"))?;
        if self.owned.contains(&args.tile) {
            return Err(format!("tile {} is already owned", args.tile));
        }
        let balance = self.funds.get(&company).copied().unwrap_or_default();
        if balance.0 < args.price {
            return Err(format!(
                "company {company} cannot afford {} (balance {})",
                args.price, balance.0
            ));
        }
        Ok(args)
    }
}

impl CoreBackend for LedgerBackend {
    fn estimate(&mut self, command: &CommandDescriptor, company: CompanyId) -> CommandCost {
        match self.check(command.command, &command.payload, company) {
            Ok(args) => CommandCost::succeeded(Money(args.price)),
            Err(reason) => CommandCost::failed(reason),
        }
    }

    fn execute(&mut self, packet: &CommandPacket) -> Dispatch {
        let cost = match self.check(packet.command, &packet.payload, packet.company) {
            Ok(args) => {
                self.owned.insert(args.tile);
                let balance = self.funds.entry(packet.company).or_default();
                *balance += Money(-args.price);
                CommandCost::succeeded(Money(args.price))
            }
            Err(reason) => CommandCost::failed(reason),
        };
        let balance = self.funds.get(&packet.company).copied().unwrap_or_default();
        Dispatch::Completed {
            cost,
            data: balance.0.to_le_bytes().to_vec(),
        }
    }

    fn print_console(&mut self, text: &str) {
        println!("{text}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_does_not_spend() {
        let mut ledger = LedgerBackend::new().with_funds(CompanyId(0), Money(100));
        let descriptor = BuyTile { tile: 4, price: 60 }.descriptor().expect("encode");

        assert!(ledger.estimate(&descriptor, CompanyId(0)).success);
        assert!(ledger.estimate(&descriptor, CompanyId(0)).success);
        assert!(!ledger.estimate(&descriptor, CompanyId(1)).success);
    }

    #[test]
    fn execute_spends_and_claims_the_tile() {
        let mut ledger = LedgerBackend::new().with_funds(CompanyId(0), Money(100));
        let descriptor = BuyTile { tile: 4, price: 60 }.descriptor().expect("encode");
        let packet = CommandPacket {
            command: descriptor.command,
            payload: descriptor.payload.clone(),
            company: CompanyId(0),
            callback: None,
            script_results: Vec::new(),
        };

        let Dispatch::Completed { cost, data } = ledger.execute(&packet) else {
            panic!("ledger completes locally");
        };
        assert!(cost.success);
        assert_eq!(data, 40i64.to_le_bytes().to_vec());

        let Dispatch::Completed { cost, .. } = ledger.execute(&packet) else {
            panic!("ledger completes locally");
        };
        assert_eq!(cost.error.as_deref(), Some("tile 4 is already owned"));
    }
}
