
/// Find all elements of a collection whose key is maximal w.r.t. the given key function.
///
/// Returns an empty Vec for an empty input. The relative order of the returned elements
/// follows the input order, so a caller picking one of them uniformly at random stays
/// deterministic under a fixed RNG.
pub fn max_elems_by_key<T, K, F>(iter: impl IntoIterator<Item = T>, key: F) -> Vec<T>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut result = Vec::new();
    let mut max_key: Option<K> = None;
    for elem in iter {
        let elem_key = key(&elem);
        match &max_key {
            Some(k) if elem_key < *k => {}
            Some(k) if elem_key == *k => {
                result.push(elem);
            }
            _ => {
                max_key = Some(elem_key);
                result.clear();
                result.push(elem);
            }
        }
    }
    result
}
