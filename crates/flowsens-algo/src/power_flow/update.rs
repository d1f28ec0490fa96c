//! Write solved values back to the source grid through a [`StateSink`].

use super::result::ComponentResult;
use super::SolverStatus;
use crate::equations::{Term, TermContext};
use crate::network::{BranchType, GeneratorKind, LfNetwork, LoadKind, TapChangerKind};
use flowsens_core::{Degrees, GridResult, Kilovolts, Side, StateSink, TerminalFlow};

fn injection_flow(net: &LfNetwork, bus: usize, p: f64, q: f64) -> TerminalFlow {
    let v = net.buses[bus].v;
    let i = if v > 0.0 {
        p.hypot(q) / v * net.current_base(bus)
    } else {
        0.0
    };
    TerminalFlow {
        p: p * net.base_power,
        q: q * net.base_power,
        i,
    }
}

/// Power entering an emulated HVDC link at `bus`, per-unit.
fn emulated_hvdc_p(net: &LfNetwork, hvdc: Option<usize>, bus: usize) -> f64 {
    let Some(h) = hvdc else {
        return 0.0;
    };
    let link = &net.hvdcs[h];
    if !link.emulation_active() {
        return 0.0;
    }
    let term = if link.bus1 == Some(bus) {
        Term::HvdcP1(h)
    } else {
        Term::HvdcP2(h)
    };
    term.value(net, TermContext::default())
}

/// Push a converged component into the grid state. Non-converged results leave
/// the grid untouched.
pub fn update_state<S: StateSink + ?Sized>(
    net: &LfNetwork,
    result: &ComponentResult,
    sink: &mut S,
    write_slack_terminal: bool,
) -> GridResult<()> {
    if result.status != SolverStatus::Converged {
        tracing::debug!(component = net.num_sc, status = ?result.status, "state not written");
        return Ok(());
    }
    for bus in net.buses.iter().filter(|b| !b.disabled && !b.fictitious) {
        sink.set_bus_state(
            &bus.id,
            &bus.source_ids,
            Kilovolts(bus.v_kv()),
            Degrees(bus.angle_degrees()),
        );
    }

    for (branch, res) in net.branches.iter().zip(&result.branches) {
        let f = &res.flow;
        let side1 = TerminalFlow {
            p: f.p1,
            q: f.q1,
            i: f.i1,
        };
        let side2 = TerminalFlow {
            p: f.p2,
            q: f.q2,
            i: f.i2,
        };
        match branch.branch_type {
            BranchType::Switch => {}
            BranchType::TransformerLeg(side) => sink.set_terminal_flow(&branch.source_id, side, side1),
            BranchType::DanglingLine => sink.set_terminal_flow(&branch.source_id, Side::One, side1),
            BranchType::Line | BranchType::Transformer => {
                sink.set_terminal_flow(&branch.source_id, Side::One, side1);
                sink.set_terminal_flow(&branch.source_id, Side::Two, side2);
            }
        }
        if let Some(kind) = branch.tap_changer {
            let leg = match branch.branch_type {
                BranchType::TransformerLeg(side) => Some(side),
                _ => None,
            };
            let position = branch.pi.tap_position()?;
            match kind {
                TapChangerKind::Ratio => sink.set_ratio_tap_position(&branch.source_id, leg, position)?,
                TapChangerKind::Phase => sink.set_phase_tap_position(&branch.source_id, leg, position)?,
            }
        }
    }

    for g in net.generators.iter().filter(|g| !g.disabled && !net.buses[g.bus].disabled) {
        let hvdc = match g.kind {
            GeneratorKind::VscConverter { hvdc } => hvdc,
            GeneratorKind::Generator => None,
        };
        let p = -g.target_p + emulated_hvdc_p(net, hvdc, g.bus);
        sink.set_terminal_flow(&g.id, Side::One, injection_flow(net, g.bus, p, -g.calculated_q));
    }
    for l in net.loads.iter().filter(|l| !l.disabled && !net.buses[l.bus].disabled) {
        let hvdc = match l.kind {
            LoadKind::DanglingLineBoundary => continue,
            LoadKind::LccConverter { hvdc } => hvdc,
            LoadKind::Load => None,
        };
        let p = l.target_p + emulated_hvdc_p(net, hvdc, l.bus);
        sink.set_terminal_flow(&l.id, Side::One, injection_flow(net, l.bus, p, l.target_q));
    }
    for s in net.shunts.iter().filter(|s| !s.disabled && !net.buses[s.bus].disabled) {
        let ctx = TermContext::default();
        let (p, q) = (Term::ShuntP(s.num).value(net, ctx), Term::ShuntQ(s.num).value(net, ctx));
        sink.set_terminal_flow(&s.id, Side::One, injection_flow(net, s.bus, p, q));
        sink.set_shunt_section_count(&s.id, s.section_count)?;
    }

    if write_slack_terminal {
        for &bus in &net.slack_buses {
            let b = &net.buses[bus];
            let element = b
                .generators
                .first()
                .map(|&g| net.generators[g].id.as_str())
                .or_else(|| b.loads.first().map(|&l| net.loads[l].id.as_str()))
                .or_else(|| b.branches.first().map(|&br| net.branches[br].source_id.as_str()));
            if let Some(element) = element {
                sink.set_slack_terminal(&b.voltage_level, element);
            }
        }
    }
    tracing::debug!(component = net.num_sc, "state written to grid");
    Ok(())
}
