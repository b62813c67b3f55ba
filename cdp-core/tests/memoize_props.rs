// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Property tests for memoizer keys

use cdp_core::Memoizer;
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    #[test]
    fn prop_key_is_deterministic(tenant in "[a-z]{1,12}", event in "[a-z-]{0,20}", prod: bool) {
        let memo = Memoizer::with_own_cache("load_rules", Duration::from_secs(1), 4);
        let a = memo.key(&(&tenant, prod, &event)).unwrap();
        let b = memo.key(&(&tenant, prod, &event)).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert!(a.starts_with("load_rules:"));
        // name, colon, 64 hex digits
        prop_assert_eq!(a.len(), "load_rules:".len() + 64);
    }

    #[test]
    fn prop_environment_changes_key(tenant in "[a-z]{1,12}") {
        let memo = Memoizer::with_own_cache("f", Duration::from_secs(1), 4);
        prop_assert_ne!(memo.key(&(&tenant, true)), memo.key(&(&tenant, false)));
    }
}
