// Interface adapters: the wire codec and the axum glue that drives it.
// Everything here is translation — no lobby/peer logic lives in this layer.

pub mod net;
pub mod protocol;
