//! Double-typed bindings used by the arithmetic engine.
//!
//! Each registered variable owns a `VirtualDouble`. For remanent contexts
//! (self / global with static keys) it aliases the host document's stable
//! cell; for non-remanent contexts it owns an internal slot that the
//! evaluator refreshes before each evaluation. A binding is never shared
//! between expressions.

use std::cell::Cell;

use core_document::CellRef;

#[derive(Debug)]
pub enum VirtualDouble {
    /// Aliases a stable cell inside a host document.
    External(CellRef),
    /// Internally buffered value, refreshed by the evaluator.
    Internal(Cell<f64>),
}

impl VirtualDouble {
    pub fn external(cell: CellRef) -> Self {
        VirtualDouble::External(cell)
    }

    pub fn internal() -> Self {
        VirtualDouble::Internal(Cell::new(0.0))
    }

    pub fn get(&self) -> f64 {
        match self {
            VirtualDouble::External(cell) => cell.get(),
            VirtualDouble::Internal(slot) => slot.get(),
        }
    }

    /// Writes the internal slot. External bindings read through their cell
    /// and are left untouched.
    pub fn set_direct(&self, value: f64) {
        if let VirtualDouble::Internal(slot) = self {
            slot.set(value);
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, VirtualDouble::External(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_document::Document;

    #[test]
    fn external_binding_tracks_document_cell() {
        let doc = Document::new();
        doc.set("x", 3.0);
        let vd = VirtualDouble::external(doc.stable_cell("x"));
        assert_eq!(vd.get(), 3.0);
        doc.set("x", 4.0);
        assert_eq!(vd.get(), 4.0);
    }

    #[test]
    fn internal_binding_buffers() {
        let vd = VirtualDouble::internal();
        assert_eq!(vd.get(), 0.0);
        vd.set_direct(1.5);
        assert_eq!(vd.get(), 1.5);
    }
}
