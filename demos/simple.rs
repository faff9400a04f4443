use std::collections::HashMap;
use std::convert::Infallible;

use async_trait::async_trait;
use deferload::{BatchFunction, DeferredExecutionContext, Loader};
use futures::future;
use tracing_subscriber::EnvFilter;

// Empty functor that implements the BatchFunction trait. For this example, it
// trivially loads values from some HashMap.
struct MyBatchFn;

#[async_trait(?Send)]
impl BatchFunction<i64, Option<String>> for MyBatchFn {
    type Context = HashMap<i64, String>;
    type Error = Infallible;

    async fn load(
        keys: &[i64],
        context: &Self::Context,
    ) -> Result<Vec<Option<String>>, Infallible> {
        println!("fetching {keys:?}");
        Ok(keys.iter().map(|k| context.get(k).cloned()).collect())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let mut context = HashMap::new();
    context.insert(2001, "a space odyssey".to_owned());
    context.insert(7, "samurai".to_owned());
    context.insert(12, "angry men".to_owned());

    let execution = DeferredExecutionContext::new();
    let loader = Loader::new(MyBatchFn, context, &execution.handle());

    // Three resolvers, one fetch.
    let titles = execution
        .execute(async move {
            let (samurai, missing, many) = future::join3(
                loader.load(7),
                loader.load(15),
                loader.load_many(vec![12, 2010, 2001]),
            )
            .await;
            assert_eq!(samurai.unwrap().as_deref(), Some("samurai"));
            assert_eq!(missing.unwrap(), None);
            Ok::<_, Infallible>(many.into_iter().map(|v| v.unwrap()).collect::<Vec<_>>())
        })
        .await
        .unwrap();

    assert_eq!(
        titles.iter().map(Option::as_deref).collect::<Vec<_>>(),
        vec![Some("angry men"), None, Some("a space odyssey")]
    );
    println!("{titles:?}");
}
