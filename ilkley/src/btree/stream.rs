//! Stream adapters
//!
//! Each stream captures its own snapshot when it is created; mutations made
//! while the stream is being consumed are never observed.

use futures::stream;
use futures::Stream;

use super::ilkley::Ilkley;
use super::ilkley::IlkleyKey;
use super::ilkley::IlkleyValue;

impl<K, V> Ilkley<K, V>
where
    K: IlkleyKey + Send + Sync + 'static,
    V: IlkleyValue + Send + Sync + 'static,
{
    /// Return a stream of entries in ascending key order.
    pub async fn entries(&self) -> impl Stream<Item = (K, V)> {
        stream::iter(self.browse().await)
    }

    /// Return a stream of keys in ascending order.
    pub async fn keys(&self) -> impl Stream<Item = K> {
        stream::iter(self.browse().await.map(|entry| entry.0))
    }

    /// Return a stream of values in ascending key order.
    pub async fn values(&self) -> impl Stream<Item = V> {
        stream::iter(self.browse().await.map(|entry| entry.1))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn it_streams_entries_in_order() {
        let tree = Ilkley::<usize, usize>::try_new("stream_entries", 4)
            .await
            .expect("creates tree");
        let input = vec![7, 8, 14, 20, 21, 27, 34, 42, 43, 47, 48, 52, 64, 72, 90];
        for i in &input {
            tree.insert(*i, *i).await.expect("insert worked");
        }

        let keys = tree.keys().await.collect::<Vec<usize>>().await;
        assert_eq!(keys, input);

        let values = tree.values().await.collect::<Vec<usize>>().await;
        assert_eq!(values, input);

        tree.close().await.expect("closes");
        std::fs::remove_file("stream_entries.data").expect("cleanup");
        std::fs::remove_file("stream_entries.log").expect("cleanup");
    }

    #[test_log::test(tokio::test)]
    async fn it_streams_nothing_from_an_empty_tree() {
        let tree = Ilkley::<usize, usize>::try_new("stream_empty", 4)
            .await
            .expect("creates tree");

        let entries = tree.entries().await.collect::<Vec<(usize, usize)>>().await;
        assert!(entries.is_empty());

        tree.close().await.expect("closes");
        std::fs::remove_file("stream_empty.data").expect("cleanup");
        std::fs::remove_file("stream_empty.log").expect("cleanup");
    }
}
