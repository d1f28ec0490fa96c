//! Graph algorithms on the calculation network.
//!
//! [`GraphConnectivity`] answers "which buses are still reachable" for the
//! contingency engine. It works on bus and branch indices of one
//! [`LfNetwork`](crate::network::LfNetwork) and supports nested temporary
//! removals, so each contingency state starts from the same base graph.
//!
//! ```
//! use flowsens_algo::graph::GraphConnectivity;
//! use flowsens_algo::test_utils::meshed_network;
//!
//! let net = meshed_network();
//! let mut graph = GraphConnectivity::new(&net);
//! graph.start_temporary_changes();
//! graph.remove_edge(0);
//! assert_eq!(graph.component_count(), 2);
//! graph.undo_temporary_changes();
//! assert_eq!(graph.component_count(), 1);
//! ```

pub mod connectivity;

pub use connectivity::GraphConnectivity;
