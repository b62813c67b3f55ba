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

//! Context isolation across concurrently running tasks

use cdp_core::context::is_bound;
use cdp_core::{current_context, spawn_with_context, with_context, with_context_sync, Context};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_tasks_see_their_own_context() {
    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();

    for (tenant, production) in [("acme", true), ("globex", false)] {
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            let ctx = Context::new(tenant, production);
            with_context(ctx.clone(), async move {
                // both tasks are inside their scope before either resumes
                barrier.wait().await;
                tokio::task::yield_now().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                current_context() == ctx
            })
            .await
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap());
    }
}

#[tokio::test]
async fn test_interleaved_on_one_thread() {
    let a = Context::new("a", true);
    let b = Context::new("b", false);

    let (seen_a, seen_b) = tokio::join!(
        with_context(a.clone(), async {
            tokio::task::yield_now().await;
            let first = current_context();
            tokio::time::sleep(Duration::from_millis(5)).await;
            (first, current_context())
        }),
        with_context(b.clone(), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let first = current_context();
            tokio::task::yield_now().await;
            (first, current_context())
        }),
    );

    assert_eq!(seen_a, (a.clone(), a));
    assert_eq!(seen_b, (b.clone(), b));
}

#[tokio::test]
async fn test_cancelled_inner_scope_restores_outer() {
    let outer = Context::new("outer", false);

    with_context(outer.clone(), async {
        let inner = with_context(Context::new("inner", true), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), inner).await;
        assert!(timed_out.is_err());
        assert_eq!(current_context(), outer);
    })
    .await;

    assert!(!is_bound());
}

#[test]
fn test_panic_restores_binding() {
    let result = std::panic::catch_unwind(|| {
        with_context_sync(Context::new("doomed", true), || panic!("boom"));
    });
    assert!(result.is_err());
    assert!(!is_bound());
    assert_eq!(current_context(), Context::default());
}

#[tokio::test]
async fn test_spawned_task_inherits_binding() {
    let ctx = Context::new("acme", true);
    let seen = with_context(ctx.clone(), async {
        spawn_with_context(async { current_context() }).await.unwrap()
    })
    .await;
    assert_eq!(seen, ctx);

    // plain spawn outside any scope runs with the default
    let unbound = spawn_with_context(async { is_bound() }).await.unwrap();
    assert!(!unbound);
}
